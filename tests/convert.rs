use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use bidsprep::convert::{ConversionRequest, TemplateSource, convert_dicom_to_bids};
use bidsprep::error::PrepError;
use bidsprep::manifest::Manifest;
use bidsprep::output::JsonOutput;
use bidsprep::process::{CommandRunner, RunStatus, ToolInfo};

#[derive(Default)]
struct MockRunner {
    calls: Mutex<Vec<Vec<String>>>,
    fail_on_call: Option<usize>,
    not_installed: bool,
}

impl CommandRunner for MockRunner {
    fn run(&self, argv: &[String]) -> Result<RunStatus, PrepError> {
        let mut guard = self.calls.lock().unwrap();
        guard.push(argv.to_vec());
        if self.not_installed {
            return Err(PrepError::MissingTool(argv[0].clone()));
        }
        if self.fail_on_call == Some(guard.len()) {
            return Ok(RunStatus::Failed { code: Some(1) });
        }
        Ok(RunStatus::Success)
    }

    fn tool_info(&self, program: &str) -> ToolInfo {
        ToolInfo {
            program: program.to_string(),
            path: None,
            version: None,
        }
    }
}

impl MockRunner {
    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    heuristic: Utf8PathBuf,
}

fn fixture() -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let heuristic = root.join("reproin_heuristic.py");
    fs::write(&heuristic, "def infotodict(seqinfo):\n    return {}\n").unwrap();
    Fixture {
        _temp: temp,
        root,
        heuristic,
    }
}

fn manifest() -> Manifest {
    Manifest::from_reader(
        "subject_code,session_id,dicom_path\n001,01,/data/001\n002,01,/data/002\n003,,/data/003\n"
            .as_bytes(),
    )
    .unwrap()
}

fn request(fixture: &Fixture, template: TemplateSource) -> ConversionRequest {
    ConversionRequest {
        template,
        heuristic: fixture.heuristic.clone(),
        bids_dir: fixture.root.join("bids"),
        overwrite: false,
    }
}

#[test]
fn missing_template_fails_before_any_process() {
    let fixture = fixture();
    let runner = MockRunner::default();
    let missing = TemplateSource::File(fixture.root.join("no-such-template.txt"));

    let err = convert_dicom_to_bids(&runner, &manifest(), &request(&fixture, missing), &JsonOutput)
        .unwrap_err();

    assert_matches!(err, PrepError::Configuration(_));
    assert!(runner.calls().is_empty());
}

#[test]
fn missing_heuristic_fails_even_for_empty_manifest() {
    let fixture = fixture();
    let runner = MockRunner::default();
    let mut request = request(&fixture, TemplateSource::Builtin);
    request.heuristic = fixture.root.join("missing_heuristic.py");

    let err = convert_dicom_to_bids(&runner, &Manifest::default(), &request, &JsonOutput)
        .unwrap_err();

    assert_matches!(err, PrepError::Configuration(_));
    assert!(runner.calls().is_empty());
}

#[test]
fn runs_rows_in_manifest_order() {
    let fixture = fixture();
    let runner = MockRunner::default();

    let jobs = convert_dicom_to_bids(
        &runner,
        &manifest(),
        &request(&fixture, TemplateSource::Builtin),
        &JsonOutput,
    )
    .unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(jobs.len(), 3);
    let subjects: Vec<&str> = calls.iter().map(|argv| argv[4].as_str()).collect();
    assert_eq!(subjects, vec!["001", "002", "003"]);
    assert_eq!(&calls[0][5..7], &["-ss".to_string(), "01".to_string()]);
    assert!(!calls[2].contains(&"-ss".to_string()));
    assert_eq!(calls[0][2], "/data/001");
    assert!(calls[0].contains(&fixture.heuristic.to_string()));
}

#[test]
fn overwrite_flag_is_appended() {
    let fixture = fixture();
    let runner = MockRunner::default();
    let mut request = request(&fixture, TemplateSource::Builtin);
    request.overwrite = true;

    convert_dicom_to_bids(&runner, &manifest(), &request, &JsonOutput).unwrap();

    for argv in runner.calls() {
        assert_eq!(argv.last().map(String::as_str), Some("--overwrite"));
    }
}

#[test]
fn failing_row_stops_the_batch() {
    let fixture = fixture();
    let runner = MockRunner {
        fail_on_call: Some(2),
        ..MockRunner::default()
    };

    let err = convert_dicom_to_bids(
        &runner,
        &manifest(),
        &request(&fixture, TemplateSource::Builtin),
        &JsonOutput,
    )
    .unwrap_err();

    assert_matches!(err, PrepError::Conversion { ref command, .. } if command.contains("002"));
    assert_eq!(runner.calls().len(), 2);
}

#[test]
fn custom_template_file_is_used() {
    let fixture = fixture();
    let template_path = fixture.root.join("heudiconv.tmpl");
    fs::write(
        &template_path,
        "docker run --rm nipy/heudiconv -d {dicom_directory}/{{subject}}/*.dcm -s {subject_id} -o {output_directory} -f {heuristic} -b\n",
    )
    .unwrap();
    let runner = MockRunner::default();

    convert_dicom_to_bids(
        &runner,
        &manifest(),
        &request(&fixture, TemplateSource::File(template_path)),
        &JsonOutput,
    )
    .unwrap();

    let calls = runner.calls();
    assert_eq!(calls[0][0], "docker");
    assert_eq!(calls[0][5], "/data/001/{subject}/*.dcm");
    assert_eq!(calls[0].last().map(String::as_str), Some("-b"));
}

#[test]
fn missing_heudiconv_is_a_conversion_failure() {
    let fixture = fixture();
    let runner = MockRunner {
        not_installed: true,
        ..MockRunner::default()
    };

    let err = convert_dicom_to_bids(
        &runner,
        &manifest(),
        &request(&fixture, TemplateSource::Builtin),
        &JsonOutput,
    )
    .unwrap_err();

    assert_matches!(
        err,
        PrepError::Conversion { ref command, ref status }
            if command.starts_with("heudiconv") && status == "heudiconv not found"
    );
    assert_eq!(runner.calls().len(), 1);
}
