mod counters;
mod dispatcher;
mod mailbox;
mod worker;

pub(crate) use counters::Counters;
pub(crate) use dispatcher::{Dispatcher, Route};
pub(crate) use mailbox::{MailboxReceiver, MailboxSender, mailbox};
pub(crate) use worker::Worker;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
