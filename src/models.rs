use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::domain::{Campaign, Email as DomainEmail};

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::schema::emails)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Email {
    pub id: i64,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub is_sent: bool,
    pub opened: bool,
    pub created_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub opened_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::emails)]
pub struct NewEmail<'a> {
    pub sender: &'a str,
    pub recipient: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub is_sent: bool,
    pub opened: bool,
    pub created_at: NaiveDateTime,
}

impl<'a> NewEmail<'a> {
    pub fn new(campaign: &'a Campaign, recipient: &'a str, created_at: NaiveDateTime) -> Self {
        Self {
            sender: &campaign.sender,
            recipient,
            subject: &campaign.subject,
            body: &campaign.body,
            is_sent: false,
            opened: false,
            created_at,
        }
    }
}

impl From<Email> for DomainEmail {
    fn from(email: Email) -> Self {
        Self {
            id: email.id,
            sender: email.sender,
            recipient: email.recipient,
            subject: email.subject,
            body: email.body,
            is_sent: email.is_sent,
            opened: email.opened,
            created_at: email.created_at,
            sent_at: email.sent_at,
            opened_at: email.opened_at,
        }
    }
}
