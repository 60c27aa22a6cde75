pub mod dispatcher;
pub mod ledger;
pub mod message_builder;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mail_send::SmtpClientBuilder;

use crate::db::{establish_connection_pool, init_schema};
use crate::domain::CourierMessage;
use crate::errors::Error;
use crate::repository::DieselRepository;
use crate::settings::{Settings, SmtpSettings};
use crate::template::Template;

use dispatcher::Dispatcher;
use message_builder::build_message;
use service::{Courier, DeliveryFailure, Envelope, Mailer, TransportError, Welcome};

/// SMTP mailer that leverages [`mail_send`].
///
/// Opens one connection per delivery, bounded by the configured timeout.
pub struct SmtpMailer {
    settings: SmtpSettings,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let credentials = (
            self.settings.username.as_str(),
            self.settings.password.as_str(),
        );

        let delivery = async {
            SmtpClientBuilder::new(self.settings.host.as_str(), self.settings.port)
                .implicit_tls(self.settings.implicit_tls)
                .credentials(credentials)
                .timeout(timeout)
                .connect()
                .await?
                .send(build_message(envelope))
                .await?;
            Ok::<(), mail_send::Error>(())
        };

        match tokio::time::timeout(timeout, delivery).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::new(&envelope.recipient, e)),
            Err(_) => Err(TransportError::new(
                &envelope.recipient,
                DeliveryFailure::Timeout(timeout),
            )),
        }
    }
}

/// Entry point for the campaign worker.
pub async fn run(settings: Settings) -> Result<(), Error> {
    let db_pool = establish_connection_pool(&settings.database_url)?;
    init_schema(&db_pool)?;
    let repo = Arc::new(DieselRepository::new(db_pool));
    let mailer = Arc::new(SmtpMailer::new(settings.smtp.clone()));

    let template = Template::load(&settings.template.path, &settings.template.block)?;
    let welcome = Welcome {
        template: Arc::new(Template::load(
            &settings.subscribe.path,
            &settings.subscribe.block,
        )?),
        subject: settings.subscribe.subject.clone(),
    };

    let dispatcher = Dispatcher::new(repo, mailer, template, settings.dispatch_config())?;
    let courier = Arc::new(Courier::new(dispatcher, welcome, settings.sender.clone()));

    let context = zmq::Context::new();
    let responder = context.socket(zmq::SUB)?;
    responder.connect(&settings.zmq_address)?;
    responder.set_subscribe(b"")?;

    log::info!("Starting campaign worker on {}", settings.zmq_address);

    loop {
        let msg = responder.recv_bytes(0)?;
        match serde_json::from_slice::<CourierMessage>(&msg) {
            Ok(parsed) => {
                let courier = Arc::clone(&courier);
                tokio::spawn(async move {
                    if let Err(e) = courier.handle(parsed).await {
                        log::error!("Error handling courier message: {e}");
                    }
                });
            }
            Err(e) => {
                log::error!("Error receiving message: {e}");
            }
        }
    }
}
