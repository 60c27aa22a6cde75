use dotenvy::dotenv;
use pushkind_courier::send_email::run;
use pushkind_courier::settings::Settings;

/// Entry point for the campaign worker.
#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    dotenv().ok();

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        log::warn!("A rustls crypto provider is already installed");
    }

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(settings).await {
        log::error!("{e}");
        std::process::exit(1);
    }
}
