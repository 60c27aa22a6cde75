use mail_send::mail_builder::MessageBuilder;

use super::service::Envelope;

/// Builds an email message ready to be sent via SMTP.
///
/// The rendered HTML is used for both the HTML and the plain-text part.
#[must_use]
pub fn build_message(envelope: &Envelope) -> MessageBuilder<'_> {
    let mut message = MessageBuilder::new()
        .from(envelope.sender.as_str())
        .to(vec![("", envelope.recipient.as_str())])
        .subject(envelope.subject.as_str())
        .html_body(envelope.html_body.as_str())
        .text_body(envelope.html_body.as_str());

    if let Some(message_id) = envelope.message_id.as_deref() {
        message = message.message_id(message_id);
    }

    message
}
