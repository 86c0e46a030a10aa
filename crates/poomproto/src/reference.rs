//! Run reference URLs of the form `<scheme>://run/<run_id>`.

/// Formats and parses run references for one scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReference {
    scheme: String,
}

impl RunReference {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Reference URL for a run id.
    pub fn url(&self, run_id: &str) -> String {
        format!("{}://run/{}", self.scheme, run_id)
    }

    /// Extract the run id from a reference. Scheme comparison ignores case;
    /// anything after the id (`/...`, `?...`, `#...`) is dropped.
    pub fn parse(&self, reference: &str) -> Option<String> {
        let reference = reference.trim();
        let (scheme, rest) = reference.split_once("://")?;
        if !scheme.eq_ignore_ascii_case(&self.scheme) {
            return None;
        }
        let rest = rest.strip_prefix("run/")?;
        let run_id = rest
            .split(|c| c == '/' || c == '?' || c == '#')
            .next()
            .unwrap_or_default();

        if run_id.is_empty() {
            None
        } else {
            Some(run_id.to_string())
        }
    }
}
