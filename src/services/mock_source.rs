//! In-memory [`TimelineSource`] for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use super::interaction::{CallLogRow, EmailRow, LegacyInteractionRow, WhatsAppRow};
use super::lead::{Contact, Lead, LeadError, LeadRef};
use super::templates::WhatsAppTemplate;
use super::timeline::TimelineSource;

#[derive(Default)]
pub struct MockSource {
    pub lead: Option<Lead>,
    pub contacts: Vec<Contact>,
    pub emails: Vec<EmailRow>,
    pub whatsapp: Vec<WhatsAppRow>,
    pub calls: Vec<CallLogRow>,
    pub legacy: Vec<LegacyInteractionRow>,
    pub templates: Vec<WhatsAppTemplate>,
    /// Source names that should fail: `contacts`, `emails`, `whatsapp`,
    /// `calls`, `legacy`, `templates`.
    pub failing: HashSet<&'static str>,
    pub lead_fetches: AtomicUsize,
}

impl MockSource {
    #[must_use]
    pub fn with_lead(lead: Lead) -> Self {
        Self { lead: Some(lead), ..Self::default() }
    }

    pub fn lead_fetches(&self) -> usize {
        self.lead_fetches.load(Ordering::SeqCst)
    }

    fn check(&self, name: &str) -> Result<(), sqlx::Error> {
        if self.failing.contains(name) {
            return Err(sqlx::Error::Protocol(format!("{name} unavailable")));
        }
        Ok(())
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().unwrap_or_default()
}

pub fn lead(id: LeadRef, name: &str) -> Lead {
    Lead {
        id,
        name: name.to_owned(),
        email: Some("dana@example.com".into()),
        phone: None,
        mobile: Some("052-765-4321".into()),
        manual_interactions: Vec::new(),
    }
}

pub fn email_row(message_id: &str, direction: &str, sent_at: DateTime<Utc>) -> EmailRow {
    EmailRow {
        message_id: message_id.to_owned(),
        contact_id: None,
        sender_name: Some("Avi Cohen".into()),
        sender_email: Some("dana@example.com".into()),
        recipient_list: Some("dana@example.com".into()),
        subject: Some(format!("Subject {message_id}")),
        body_preview: Some("Body".into()),
        direction: direction.to_owned(),
        sent_at,
    }
}

pub fn whatsapp_row(id: i64, status: &str, sent_at: DateTime<Utc>) -> WhatsAppRow {
    WhatsAppRow {
        id,
        contact_id: None,
        phone_number: Some("972527654321".into()),
        sender_name: Some("Avi Cohen".into()),
        direction: "out".into(),
        message: Some(format!("message {id}")),
        message_type: "text".into(),
        media_url: None,
        template_id: None,
        template_params: None,
        whatsapp_message_id: Some(format!("wamid.{id}")),
        status: status.to_owned(),
        error_message: None,
        sent_at,
    }
}

pub fn call_row(id: i64, when: DateTime<Utc>) -> CallLogRow {
    CallLogRow {
        id,
        contact_id: None,
        cdate: Some(when.date_naive()),
        ctime: Some(when.time()),
        direction: Some("Incoming".into()),
        source: Some("0527654321".into()),
        destination: Some("201".into()),
        duration: Some(95),
        employee: Some("Avi Cohen".into()),
        status: Some("answered".into()),
    }
}

#[async_trait::async_trait]
impl TimelineSource for MockSource {
    async fn lead(&self, lead: LeadRef) -> Result<Lead, LeadError> {
        self.lead_fetches.fetch_add(1, Ordering::SeqCst);
        self.lead.clone().filter(|l| l.id == lead).ok_or(LeadError::NotFound(lead))
    }

    async fn contacts(&self, _lead: LeadRef) -> Result<Vec<Contact>, LeadError> {
        self.check("contacts")?;
        Ok(self.contacts.clone())
    }

    async fn emails(&self, _lead: LeadRef, limit: i64) -> Result<Vec<EmailRow>, sqlx::Error> {
        self.check("emails")?;
        Ok(self.emails.iter().take(limit as usize).cloned().collect())
    }

    async fn whatsapp(&self, _lead: LeadRef, limit: i64) -> Result<Vec<WhatsAppRow>, sqlx::Error> {
        self.check("whatsapp")?;
        Ok(self.whatsapp.iter().take(limit as usize).cloned().collect())
    }

    async fn calls(&self, _lead: LeadRef, limit: i64) -> Result<Vec<CallLogRow>, sqlx::Error> {
        self.check("calls")?;
        Ok(self.calls.iter().take(limit as usize).cloned().collect())
    }

    async fn legacy_interactions(&self, _legacy_id: i64, limit: i64) -> Result<Vec<LegacyInteractionRow>, sqlx::Error> {
        self.check("legacy")?;
        Ok(self.legacy.iter().take(limit as usize).cloned().collect())
    }

    async fn templates(&self) -> Result<Vec<WhatsAppTemplate>, sqlx::Error> {
        self.check("templates")?;
        Ok(self.templates.clone())
    }
}
