use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("rolechat.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("rolechat.client.request_errors");
pub(crate) static CLIENT_MODEL_LISTS: Counter = Counter::new("rolechat.client.model_lists");
pub(crate) static CLIENT_MODEL_LIST_ERRORS: Counter =
    Counter::new("rolechat.client.model_list_errors");

pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("rolechat.stream.fragments");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("rolechat.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("rolechat.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("rolechat.stream.ttfb_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("rolechat.stream.duration_seconds");

pub(crate) static TURNS_COMMITTED: Counter = Counter::new("rolechat.conversation.committed");
pub(crate) static TURNS_FAILED: Counter = Counter::new("rolechat.conversation.failed");
pub(crate) static TURNS_REJECTED_BUSY: Counter = Counter::new("rolechat.conversation.busy");

pub(crate) static STORE_PERSISTS: Counter = Counter::new("rolechat.store.persists");
pub(crate) static STORE_PERSIST_ERRORS: Counter = Counter::new("rolechat.store.persist_errors");
pub(crate) static STORE_SNAPSHOT_BYTES: Moments = Moments::new("rolechat.store.snapshot_bytes");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_MODEL_LISTS);
    collector.register_counter(&CLIENT_MODEL_LIST_ERRORS);

    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&TURNS_COMMITTED);
    collector.register_counter(&TURNS_FAILED);
    collector.register_counter(&TURNS_REJECTED_BUSY);

    collector.register_counter(&STORE_PERSISTS);
    collector.register_counter(&STORE_PERSIST_ERRORS);
    collector.register_moments(&STORE_SNAPSHOT_BYTES);
}
