//! Email repository implementation backed by Diesel.
//!
//! Provides [`EmailReader`] and [`EmailWriter`] trait implementations for
//! [`DieselRepository`].

use chrono::Utc;
use diesel::prelude::*;

use crate::domain::{Campaign, Email as DomainEmail, EmailId};
use crate::models::{Email as DbEmail, NewEmail as DbNewEmail};
use crate::repository::{
    DieselRepository, EmailReader, EmailWriter, RepositoryError, RepositoryResult,
};

impl EmailReader for DieselRepository {
    fn get_email_by_id(&self, id: EmailId) -> RepositoryResult<Option<DomainEmail>> {
        use crate::schema::emails;
        let mut conn = self.conn()?;

        let email = emails::table
            .filter(emails::id.eq(id))
            .select(DbEmail::as_select())
            .first::<DbEmail>(&mut conn)
            .optional()?;

        Ok(email.map(Into::into))
    }

    fn list_emails(&self) -> RepositoryResult<Vec<DomainEmail>> {
        use crate::schema::emails;
        let mut conn = self.conn()?;

        let emails = emails::table
            .order(emails::id.desc())
            .select(DbEmail::as_select())
            .load::<DbEmail>(&mut conn)?;

        Ok(emails.into_iter().map(Into::into).collect())
    }

    fn list_emails_by_recipient(&self, address: &str) -> RepositoryResult<Vec<DomainEmail>> {
        use crate::schema::emails;
        let mut conn = self.conn()?;

        let emails = emails::table
            .filter(emails::recipient.eq(address))
            .order(emails::id.desc())
            .select(DbEmail::as_select())
            .load::<DbEmail>(&mut conn)?;

        Ok(emails.into_iter().map(Into::into).collect())
    }
}

impl EmailWriter for DieselRepository {
    fn insert_email(&self, campaign: &Campaign, recipient: &str) -> RepositoryResult<EmailId> {
        use crate::schema::emails;

        if recipient.trim().is_empty() {
            return Err(RepositoryError::ValidationError(
                "recipient address is empty".to_owned(),
            ));
        }

        let mut conn = self.conn()?;
        let new_email = DbNewEmail::new(campaign, recipient, Utc::now().naive_utc());

        let id = diesel::insert_into(emails::table)
            .values(&new_email)
            .returning(emails::id)
            .get_result::<i64>(&mut conn)?;

        Ok(id)
    }

    fn update_email_status(&self, id: EmailId) -> RepositoryResult<()> {
        use crate::schema::emails;
        let mut conn = self.conn()?;

        let updated = diesel::update(emails::table.filter(emails::id.eq(id)))
            .set((
                emails::is_sent.eq(true),
                emails::sent_at.eq(Some(Utc::now().naive_utc())),
            ))
            .execute(&mut conn)?;

        match updated {
            0 => Err(RepositoryError::NotFound),
            _ => Ok(()),
        }
    }

    fn update_email_tracking(&self, id: EmailId) -> RepositoryResult<()> {
        use crate::schema::emails;
        let mut conn = self.conn()?;

        conn.transaction::<_, RepositoryError, _>(|conn| {
            let updated = diesel::update(emails::table.filter(emails::id.eq(id)))
                .set(emails::opened.eq(true))
                .execute(conn)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound);
            }

            diesel::update(
                emails::table
                    .filter(emails::id.eq(id))
                    .filter(emails::opened_at.is_null()),
            )
            .set(emails::opened_at.eq(Some(Utc::now().naive_utc())))
            .execute(conn)?;

            Ok(())
        })
    }
}
