//! Domain services. Handlers in `routes` stay thin and call into these.

pub mod contacts;
pub mod interaction;
pub mod lead;
pub mod mailbox;
pub mod notes;
pub mod summary;
pub mod templates;
pub mod timeline;
pub mod timeline_cache;
pub mod whatsapp;
pub mod whatsapp_webhook;

#[cfg(test)]
pub(crate) mod mock_source;
#[cfg(test)]
pub(crate) mod mock_whatsapp;
