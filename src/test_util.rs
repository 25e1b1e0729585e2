use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::TranslationFault;
use crate::languages::Direction;
use crate::providers::retry::{SleepFuture, Sleeper};
use crate::providers::{ServiceFuture, TranslationService};

type Reply = Result<String, TranslationFault>;

/// Records requested waits instead of sleeping.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn recorded(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        self.waits.lock().unwrap().push(duration);
        Box::pin(async {})
    }
}

/// Translation service answering from a closure (plain) and a queue (grouped).
pub(crate) struct ScriptedService {
    translate: Box<dyn Fn(&str) -> Reply + Send + Sync>,
    grouped: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub(crate) fn new<F>(translate: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self {
            translate: Box::new(translate),
            grouped: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Uppercases plain requests.
    pub(crate) fn upper() -> Self {
        Self::new(|text| Ok(text.to_uppercase()))
    }

    pub(crate) fn with_grouped(self, replies: Vec<Reply>) -> Self {
        *self.grouped.lock().unwrap() = replies.into();
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl TranslationService for ScriptedService {
    fn translate<'a>(&'a self, text: &'a str, _direction: Direction) -> ServiceFuture<'a> {
        self.calls.lock().unwrap().push(text.to_string());
        let reply = (self.translate)(text);
        Box::pin(async move { reply })
    }

    fn translate_grouped<'a>(&'a self, span_json: &'a str, _direction: Direction) -> ServiceFuture<'a> {
        self.calls.lock().unwrap().push(span_json.to_string());
        let reply = self
            .grouped
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TranslationFault::Other("no scripted reply".to_string())));
        Box::pin(async move { reply })
    }
}
