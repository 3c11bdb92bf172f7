//! Best-effort contact attribution for timeline entries.
//!
//! A lead can have several contacts (spouse, employer, lawyer on the other
//! side). Each interaction is attributed by `contact_id` when the source row
//! carries one, otherwise by email address or phone number. When nothing
//! matches a contact but the address belongs to the lead itself, the lead's
//! main contact is used.

use super::interaction::{ContactHint, ContactTag};
use super::lead::{Contact, Lead};

/// Digits compared from the end of a phone number.
const PHONE_SUFFIX_LEN: usize = 9;
/// Shorter numbers are extensions or garbage and never match.
const PHONE_MIN_LEN: usize = 7;
const COUNTRY_CODE: &str = "972";

/// Reduce a phone number to its national significant digits.
///
/// Drops formatting, an international `00` or `+`, the `972` country code
/// and a trunk `0`. Returns `None` when fewer than [`PHONE_MIN_LEN`] digits
/// remain.
#[must_use]
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let mut rest = digits.as_str();
    if let Some(stripped) = rest.strip_prefix("00") {
        rest = stripped;
    }
    if let Some(stripped) = rest.strip_prefix(COUNTRY_CODE) {
        rest = stripped;
    }
    let rest = rest.trim_start_matches('0');
    if rest.len() < PHONE_MIN_LEN {
        return None;
    }
    Some(rest.to_owned())
}

/// Compare two phone numbers by their trailing digits.
#[must_use]
pub fn phones_match(a: &str, b: &str) -> bool {
    let (Some(a), Some(b)) = (normalize_phone(a), normalize_phone(b)) else {
        return false;
    };
    suffix(&a) == suffix(&b)
}

fn suffix(digits: &str) -> &str {
    let start = digits.len().saturating_sub(PHONE_SUFFIX_LEN);
    &digits[start..]
}

fn emails_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}

fn tag(contact: &Contact) -> ContactTag {
    ContactTag { id: contact.id, name: contact.name.clone() }
}

fn contact_phones(contact: &Contact) -> impl Iterator<Item = &str> {
    [contact.phone.as_deref(), contact.mobile.as_deref()]
        .into_iter()
        .flatten()
}

/// Attribute one interaction to a contact.
#[must_use]
pub fn attribute(hint: &ContactHint, contacts: &[Contact], lead: &Lead) -> Option<ContactTag> {
    if let Some(id) = hint.contact_id {
        if let Some(contact) = contacts.iter().find(|c| c.id == id) {
            return Some(tag(contact));
        }
    }

    if let Some(email) = hint.email.as_deref() {
        if let Some(contact) = contacts
            .iter()
            .find(|c| c.email.as_deref().is_some_and(|e| emails_match(e, email)))
        {
            return Some(tag(contact));
        }
    }

    if let Some(phone) = hint.phone.as_deref() {
        if let Some(contact) = contacts
            .iter()
            .find(|c| contact_phones(c).any(|p| phones_match(p, phone)))
        {
            return Some(tag(contact));
        }
    }

    if belongs_to_lead(hint, lead) {
        return main_contact(contacts).map(tag);
    }
    None
}

fn belongs_to_lead(hint: &ContactHint, lead: &Lead) -> bool {
    let email_hit = match (hint.email.as_deref(), lead.email.as_deref()) {
        (Some(a), Some(b)) => emails_match(a, b),
        _ => false,
    };
    let phone_hit = hint.phone.as_deref().is_some_and(|p| {
        [lead.phone.as_deref(), lead.mobile.as_deref()]
            .into_iter()
            .flatten()
            .any(|lp| phones_match(lp, p))
    });
    email_hit || phone_hit
}

fn main_contact(contacts: &[Contact]) -> Option<&Contact> {
    contacts.iter().find(|c| c.is_main)
}

#[cfg(test)]
#[path = "contacts_test.rs"]
mod tests;
