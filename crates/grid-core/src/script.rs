//! The script minifier/humanizer contract: the core only needs
//! `minify(s) -> s` / `humanize(s) -> s`; the script language itself is an
//! out-of-scope collaborator.
use shared::model::normalize_whitespace;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script rejected: {0}")]
    Rejected(String),
}

/// Minifies/humanizes an embedded script body. A real implementation wraps
/// the external script-language tool; [`WhitespaceCollapseTranspiler`] is the
/// fallback used when none is wired in, and is also the §4.5 "minifier
/// rejects the body" fallback.
pub trait ScriptTranspiler: Send + Sync {
    fn minify(&self, script: &str) -> Result<String, ScriptError>;
    fn humanize(&self, script: &str) -> Result<String, ScriptError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceCollapseTranspiler;

impl ScriptTranspiler for WhitespaceCollapseTranspiler {
    fn minify(&self, script: &str) -> Result<String, ScriptError> {
        Ok(normalize_whitespace(script))
    }

    fn humanize(&self, script: &str) -> Result<String, ScriptError> {
        Ok(normalize_whitespace(script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_runs() {
        let transpiler = WhitespaceCollapseTranspiler;
        assert_eq!(
            transpiler.minify("print(  'hi'  )\n\n").unwrap(),
            "print( 'hi' )"
        );
    }
}
