//! Plain-format email bodies for the approver prompt and requester confirmation.

use chrono::{DateTime, Utc};

use super::EmailMessage;
use crate::models::request::{AccessRequest, RequestStatus};

/// Links and expiry rendered into the approver prompt.
pub struct ApprovalLinks<'a> {
    pub approve_url: &'a str,
    pub reject_url: &'a str,
    pub expires_at: DateTime<Utc>,
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn requester_label(req: &AccessRequest) -> &str {
    req.requester_email.as_deref().unwrap_or(&req.subject_id)
}

pub fn approval_request(req: &AccessRequest, links: &ApprovalLinks<'_>, reminder: bool) -> EmailMessage {
    let requester = requester_label(req);
    let prefix = if reminder { "[Reminder]" } else { "[Action Required]" };
    let subject = format!("{} Access request for {}", prefix, requester);
    let expiry = links.expires_at.to_rfc3339();

    let text = format!(
        "{requester} has requested the role \"{role}\".\n\n\
         Approve: {approve}\n\
         Reject: {reject}\n\n\
         These links can be used once and expire at {expiry}.\n\
         Request ID: {id}\n",
        requester = requester,
        role = req.requested_role,
        approve = links.approve_url,
        reject = links.reject_url,
        expiry = expiry,
        id = req.id,
    );

    let html = format!(
        "<p><strong>{requester}</strong> has requested the role <strong>{role}</strong>.</p>\
         <p><a href=\"{approve}\">Approve</a> &nbsp;|&nbsp; <a href=\"{reject}\">Reject</a></p>\
         <p>These links can be used once and expire at {expiry}.</p>\
         <p style=\"color:#888\">Request ID: {id}</p>",
        requester = escape_html(requester),
        role = escape_html(&req.requested_role),
        approve = escape_html(links.approve_url),
        reject = escape_html(links.reject_url),
        expiry = expiry,
        id = req.id,
    );

    EmailMessage { subject, html, text }
}

pub fn decision_confirmation(req: &AccessRequest, status: RequestStatus) -> EmailMessage {
    let subject = format!(
        "Your access request for {} has been {}",
        req.requested_role, status
    );
    let text = format!(
        "Your request for the role \"{}\" has been {}.\nRequest ID: {}\n",
        req.requested_role, status, req.id
    );
    let html = format!(
        "<p>Your request for the role <strong>{}</strong> has been <strong>{}</strong>.</p>\
         <p style=\"color:#888\">Request ID: {}</p>",
        escape_html(&req.requested_role),
        status,
        req.id
    );
    EmailMessage { subject, html, text }
}
