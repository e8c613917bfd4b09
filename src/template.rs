use std::fs;

use camino::Utf8Path;

use crate::error::PrepError;

pub const DEFAULT_HEUDICONV_TEMPLATE: &str = "heudiconv -d '{dicom_directory}' -s {subject_id} -ss {session_id} -o {output_directory} -f {heuristic} -c dcm2niix";

pub const PLACEHOLDERS: [&str; 5] = [
    "dicom_directory",
    "subject_id",
    "session_id",
    "output_directory",
    "heuristic",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Field(String),
}

/// A template word split into literal text and placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Word {
    pieces: Vec<Piece>,
}

impl Word {
    fn is_only(&self, field: &str) -> bool {
        matches!(self.pieces.as_slice(), [Piece::Field(name)] if name == field)
    }
}

/// Values substituted into one rendered invocation.
#[derive(Debug, Clone, Copy)]
pub struct TemplateValues<'a> {
    pub dicom_directory: &'a str,
    pub subject_id: &'a str,
    pub session_id: Option<&'a str>,
    pub output_directory: &'a str,
    pub heuristic: &'a str,
}

impl TemplateValues<'_> {
    fn lookup(&self, field: &str) -> Option<&str> {
        match field {
            "dicom_directory" => Some(self.dicom_directory),
            "subject_id" => Some(self.subject_id),
            "session_id" => self.session_id,
            "output_directory" => Some(self.output_directory),
            "heuristic" => Some(self.heuristic),
            _ => None,
        }
    }
}

/// A command line with `{name}` placeholders, split into shell words.
///
/// `{{` and `}}` stand for literal braces. Words are split before
/// substitution, so substituted values never introduce extra arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    raw: String,
    words: Vec<Word>,
}

impl CommandTemplate {
    pub fn builtin() -> Self {
        Self::parse(DEFAULT_HEUDICONV_TEMPLATE).expect("builtin template is valid")
    }

    pub fn from_file(path: &Utf8Path) -> Result<Self, PrepError> {
        if !path.as_std_path().is_file() {
            return Err(PrepError::Configuration(format!(
                "command template not found: {path}"
            )));
        }
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| {
            PrepError::Configuration(format!("failed to read command template {path}: {err}"))
        })?;
        Self::parse(content.trim())
    }

    pub fn parse(raw: &str) -> Result<Self, PrepError> {
        let split = shlex::split(raw).ok_or_else(|| {
            PrepError::Configuration(format!("command template has unbalanced quotes: {raw}"))
        })?;
        if split.is_empty() {
            return Err(PrepError::Configuration(
                "command template is empty".to_string(),
            ));
        }
        let words = split
            .iter()
            .map(|word| parse_word(word))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(Piece::Field(_)) = words[0].pieces.first() {
            return Err(PrepError::Configuration(
                "command template must start with a program name".to_string(),
            ));
        }
        Ok(Self {
            raw: raw.to_string(),
            words,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Renders argv for one row.
    ///
    /// Without a session, a word that is exactly `{session_id}` is dropped
    /// together with the option word before it.
    pub fn render(&self, values: &TemplateValues<'_>) -> Result<Vec<String>, PrepError> {
        let mut argv: Vec<String> = Vec::with_capacity(self.words.len());
        for word in &self.words {
            if values.session_id.is_none() && word.is_only("session_id") {
                if argv.last().is_some_and(|prev| prev.starts_with('-')) {
                    argv.pop();
                }
                continue;
            }
            let mut rendered = String::new();
            for piece in &word.pieces {
                match piece {
                    Piece::Literal(text) => rendered.push_str(text),
                    Piece::Field(field) => {
                        let value = values.lookup(field).ok_or_else(|| {
                            PrepError::Configuration(format!(
                                "placeholder {{{field}}} has no value for subject {}",
                                values.subject_id
                            ))
                        })?;
                        rendered.push_str(value);
                    }
                }
            }
            argv.push(rendered);
        }
        Ok(argv)
    }
}

fn parse_word(word: &str) -> Result<Word, PrepError> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = word.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(PrepError::Configuration(format!(
                                "unclosed placeholder in command template word: {word}"
                            )));
                        }
                    }
                }
                if !PLACEHOLDERS.contains(&field.as_str()) {
                    return Err(PrepError::Configuration(format!(
                        "unknown placeholder {{{field}}} in command template"
                    )));
                }
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Field(field));
            }
            '}' => {
                return Err(PrepError::Configuration(format!(
                    "unmatched '}}' in command template word: {word}"
                )));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(Word { pieces })
}

/// Joins argv back into a copy-pasteable command line.
pub fn display_command(argv: &[String]) -> String {
    shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn values(session: Option<&str>) -> TemplateValues<'_> {
        TemplateValues {
            dicom_directory: "/data/dicom dir/001",
            subject_id: "001",
            session_id: session,
            output_directory: "/bids",
            heuristic: "/h/reproin_heuristic.py",
        }
    }

    #[test]
    fn renders_builtin_template() {
        let argv = CommandTemplate::builtin().render(&values(Some("01"))).unwrap();
        assert_eq!(
            argv,
            vec![
                "heudiconv",
                "-d",
                "/data/dicom dir/001",
                "-s",
                "001",
                "-ss",
                "01",
                "-o",
                "/bids",
                "-f",
                "/h/reproin_heuristic.py",
                "-c",
                "dcm2niix"
            ]
        );
    }

    #[test]
    fn drops_session_flag_without_session() {
        let argv = CommandTemplate::builtin().render(&values(None)).unwrap();
        assert!(!argv.iter().any(|arg| arg == "-ss"));
        assert_eq!(argv[4], "001");
        assert_eq!(argv[5], "-o");
    }

    #[test]
    fn embedded_session_without_value_fails() {
        let template = CommandTemplate::parse("tool --label=ses-{session_id}").unwrap();
        let err = template.render(&values(None)).unwrap_err();
        assert_matches!(err, PrepError::Configuration(_));
    }

    #[test]
    fn escaped_braces_are_literal() {
        let template = CommandTemplate::parse("echo {{x}} {subject_id}").unwrap();
        let argv = template.render(&values(None)).unwrap();
        assert_eq!(argv, vec!["echo", "{x}", "001"]);
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let err = CommandTemplate::parse("heudiconv -x {bogus}").unwrap_err();
        assert_matches!(err, PrepError::Configuration(_));
        let err = CommandTemplate::parse("heudiconv -s {subject_id").unwrap_err();
        assert_matches!(err, PrepError::Configuration(_));
    }
}
