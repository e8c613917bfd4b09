use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use bidsprep::error::PrepError;
use bidsprep::fmriprep::{FmriprepConfig, FmriprepOptions, run_fmriprep};
use bidsprep::process::{CommandRunner, RunStatus, ToolInfo};

struct MockDocker {
    installed: bool,
    exit_code: i32,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockDocker {
    fn new(installed: bool, exit_code: i32) -> Self {
        Self {
            installed,
            exit_code,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl CommandRunner for MockDocker {
    fn run(&self, argv: &[String]) -> Result<RunStatus, PrepError> {
        self.calls.lock().unwrap().push(argv.to_vec());
        if self.exit_code == 0 {
            Ok(RunStatus::Success)
        } else {
            Ok(RunStatus::Failed {
                code: Some(self.exit_code),
            })
        }
    }

    fn tool_info(&self, program: &str) -> ToolInfo {
        ToolInfo {
            program: program.to_string(),
            path: self.installed.then(|| format!("/usr/local/bin/{program}")),
            version: self.installed.then(|| "fmriprep-docker 24.1.1".to_string()),
        }
    }
}

fn dataset() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    fs::create_dir_all(root.join("bids")).unwrap();
    fs::write(root.join("license.txt"), "freesurfer").unwrap();
    (temp, root)
}

#[test]
fn command_includes_every_option() {
    let (_temp, root) = dataset();
    let options = FmriprepOptions::resolve(FmriprepConfig {
        bids_dir: Some(root.join("bids")),
        output_dir: Some(root.join("out")),
        participant_label: vec!["sub-001".to_string(), "002".to_string()],
        session_id: vec!["01".to_string()],
        task_id: vec!["rest".to_string()],
        output_spaces: vec!["T1w".to_string(), "fsaverage:den-10k".to_string()],
        skip_bids_validation: Some(true),
        fs_license_file: Some(root.join("license.txt")),
        work_dir: Some(root.join("work")),
        n_cpus: Some(4),
        omp_nthreads: Some(2),
        mem_gb: Some(8.5),
        low_mem: Some(true),
        bids_filter_file: None,
        docker_image: Some("nipreps/fmriprep:23.2.1".to_string()),
        verbose: Some(true),
    })
    .unwrap();

    let cmd = options.command();
    let expected: Vec<String> = [
        "fmriprep-docker",
        root.join("bids").as_str(),
        root.join("out").as_str(),
        "participant",
        "--participant-label",
        "001",
        "--participant-label",
        "002",
        "--session-id",
        "01",
        "--task-id",
        "rest",
        "--output-spaces",
        "T1w",
        "fsaverage:den-10k",
        "--skip_bids_validation",
        "--fs-license-file",
        root.join("license.txt").as_str(),
        "--work-dir",
        root.join("work").as_str(),
        "--n_cpus",
        "4",
        "--omp-nthreads",
        "2",
        "--mem_gb",
        "8.5",
        "--low-mem",
        "--image",
        "nipreps/fmriprep:23.2.1",
        "--verbose",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(cmd, expected);
}

#[test]
fn missing_license_is_a_configuration_error() {
    let (_temp, root) = dataset();
    let err = FmriprepOptions::resolve(FmriprepConfig {
        bids_dir: Some(root.join("bids")),
        output_dir: Some(root.join("out")),
        fs_license_file: Some(root.join("nope.txt")),
        ..FmriprepConfig::default()
    })
    .unwrap_err();
    assert_matches!(err, PrepError::Configuration(_));
}

#[test]
fn run_creates_directories_and_reports_failure() {
    let (_temp, root) = dataset();
    let options = FmriprepOptions::resolve(FmriprepConfig {
        bids_dir: Some(root.join("bids")),
        output_dir: Some(root.join("out")),
        work_dir: Some(root.join("work")),
        ..FmriprepConfig::default()
    })
    .unwrap();

    let ok = run_fmriprep(&MockDocker::new(true, 0), &options).unwrap();
    assert!(root.join("out").as_std_path().is_dir());
    assert!(root.join("work").as_std_path().is_dir());
    assert!(ok.command.starts_with("fmriprep-docker "));

    let err = run_fmriprep(&MockDocker::new(true, 1), &options).unwrap_err();
    assert_matches!(err, PrepError::Preprocessing { ref status, .. } if status == "exit status 1");
}

#[test]
fn missing_wrapper_is_reported_before_running() {
    let (_temp, root) = dataset();
    let options = FmriprepOptions::resolve(FmriprepConfig {
        bids_dir: Some(root.join("bids")),
        output_dir: Some(root.join("out")),
        ..FmriprepConfig::default()
    })
    .unwrap();
    let runner = MockDocker::new(false, 0);

    let err = run_fmriprep(&runner, &options).unwrap_err();

    assert_matches!(err, PrepError::MissingTool(_));
    assert!(runner.calls.lock().unwrap().is_empty());
    assert!(!root.join("out").as_std_path().exists());
}
