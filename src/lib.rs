//! Bulk message dispatch over Gmail, SMTP and WhatsApp, plus the contact
//! import and phone normalization that feeds it.

pub mod config;
pub mod contacts;
pub mod dispatch;
pub mod email_sender;
pub mod template;
pub mod whatsapp;
