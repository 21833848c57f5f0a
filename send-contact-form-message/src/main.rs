mod contact_form;
mod email_body;

use contact_form::{ContactForm, MailSettings};
use form_pipeline::{
    config::{required_env, Config},
    init_logging,
    pipeline::FormPipeline,
    secrets::open_secret_repository,
    services::{CachedTokens, Services},
    turnstile::TurnstileVerifier,
};
use lambda_http::{run, service_fn, Error};

type ContactFormPipeline = FormPipeline<ContactForm<CachedTokens>, TurnstileVerifier>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    let config = Config::from_env()?;
    let mail = MailSettings {
        sender: required_env("M365_SENDER_EMAIL")?,
        recipient: required_env("RECIPIENT_EMAIL")?,
        site_host: config.expected_hostname().to_string(),
    };
    let services = Services::new(config, open_secret_repository().await);
    let pipeline = build_pipeline(&services, mail)?;
    run(service_fn(|event| pipeline.handle(event))).await
}

fn build_pipeline(services: &Services, mail: MailSettings) -> anyhow::Result<ContactFormPipeline> {
    Ok(FormPipeline::new(
        ContactForm::new(services.graph_client(), mail),
        services.bot_verifier(),
        services.responses()?,
    ))
}
