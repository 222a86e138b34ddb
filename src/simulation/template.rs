use crate::error::{CalibrationError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// `{{` and `}}` are literal braces, `{name}` is a placeholder
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{|\}\}|\{(\w+)\}").expect("placeholder regex is valid"))
}

/// Command-line or script text with `{name}` placeholders
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTemplate {
    text: String,
}

impl CommandTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Placeholder names in order of appearance
    pub fn placeholders(&self) -> Vec<&str> {
        placeholder_regex()
            .captures_iter(&self.text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Substitute every placeholder; unknown names are an error
    pub fn render(&self, vars: &BTreeMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(self.text.len());
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(&self.text) {
            let whole = caps.get(0).expect("group 0 always matches");
            out.push_str(&self.text[last..whole.start()]);
            match caps.get(1) {
                Some(name) => {
                    let value = vars.get(name.as_str()).ok_or_else(|| {
                        CalibrationError::Template(format!(
                            "unknown placeholder '{{{}}}' in '{}'",
                            name.as_str(),
                            self.text
                        ))
                    })?;
                    out.push_str(value);
                }
                None => out.push_str(&whole.as_str()[..1]),
            }
            last = whole.end();
        }
        out.push_str(&self.text[last..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("workdir".to_string(), "/sim/ddmodel".to_string()),
            ("device".to_string(), "/sim/ddmodel/Input_files/pin.csv".to_string()),
        ])
    }

    #[test]
    fn renders_known_placeholders() {
        let t = CommandTemplate::new("cd {workdir}; demo_ms_pin('{device}')");
        assert_eq!(
            t.render(&vars()).unwrap(),
            "cd /sim/ddmodel; demo_ms_pin('/sim/ddmodel/Input_files/pin.csv')"
        );
        assert_eq!(t.placeholders(), vec!["workdir", "device"]);
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let t = CommandTemplate::new("run('{script}')");
        assert!(matches!(
            t.render(&vars()),
            Err(CalibrationError::Template(_))
        ));
    }

    #[test]
    fn doubled_braces_are_literal() {
        let t = CommandTemplate::new("x = c{{1}}; cd {workdir}");
        assert_eq!(t.render(&vars()).unwrap(), "x = c{1}; cd /sim/ddmodel");
        assert_eq!(t.placeholders(), vec!["workdir"]);
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let mut v = vars();
        v.insert("workdir".into(), "{device}".into());
        let t = CommandTemplate::new("{workdir}");
        assert_eq!(t.render(&v).unwrap(), "{device}");
    }
}
