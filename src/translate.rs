//! Pluggable translation of article text.
//!
//! The pipeline only sees the [`Translator`] trait. The built-in
//! [`PassThrough`] leaves text untouched; other backends plug in by adding a
//! [`TranslatorKind`] variant and an implementation here.

use crate::config::TranslatorKind;

pub trait Translator: Send + Sync {
    /// Translate `text`, written in `from_lang`, into the snapshot language.
    fn translate(&self, text: &str, from_lang: &str) -> String;

    fn name(&self) -> &'static str;
}

/// Returns its input unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl Translator for PassThrough {
    fn translate(&self, text: &str, _from_lang: &str) -> String {
        text.to_string()
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Build the translator selected in the configuration.
pub fn from_kind(kind: TranslatorKind) -> Box<dyn Translator> {
    match kind {
        TranslatorKind::Passthrough => Box::new(PassThrough),
    }
}
