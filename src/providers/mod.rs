use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::TranslationFault;
use crate::languages::Direction;

mod claude;
pub mod retry;

pub use claude::{ClaudeTranslator, DEFAULT_MODEL};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper, call_with_policy};

pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<String, TranslationFault>> + Send + 'a>>;

/// Remote text-completion service used for translation. One call, one attempt.
pub trait TranslationService: Send + Sync {
    fn translate<'a>(&'a self, text: &'a str, direction: Direction) -> ServiceFuture<'a>;

    /// `span_json` is a JSON array of `{index, text}`. The reply is free-form text that
    /// should contain a JSON array of `{start, end, translation}`.
    fn translate_grouped<'a>(&'a self, span_json: &'a str, direction: Direction) -> ServiceFuture<'a>;
}

impl<T> TranslationService for Arc<T>
where
    T: TranslationService + ?Sized,
{
    fn translate<'a>(&'a self, text: &'a str, direction: Direction) -> ServiceFuture<'a> {
        (**self).translate(text, direction)
    }

    fn translate_grouped<'a>(&'a self, span_json: &'a str, direction: Direction) -> ServiceFuture<'a> {
        (**self).translate_grouped(span_json, direction)
    }
}
