use crate::contact_form::ContactSubmission;
use serde::Serialize;
use tinytemplate::{error::Error, TinyTemplate};

const CONTACT_EMAIL_TEMPLATE_NAME: &str = "contact-email";
const CONTACT_EMAIL_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-email.html"
));

#[derive(Serialize)]
struct Context<'a> {
    site_host: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
    company: Option<&'a str>,
    phone: Option<&'a str>,
    interest: &'a str,
    message: &'a str,
}

/// Renders the notification sent to the site owner. Every value goes through
/// the template's default formatter, which HTML-escapes it.
pub fn render_email_body(submission: &ContactSubmission, site_host: &str) -> Result<String, Error> {
    let mut tt = TinyTemplate::new();
    tt.add_template(CONTACT_EMAIL_TEMPLATE_NAME, CONTACT_EMAIL_TEMPLATE)?;
    let context = Context {
        site_host,
        first_name: &submission.first_name,
        last_name: &submission.last_name,
        email: &submission.email,
        company: submission.company.as_deref(),
        phone: submission.phone.as_deref(),
        interest: submission.interest.label(),
        message: &submission.message,
    };
    tt.render(CONTACT_EMAIL_TEMPLATE_NAME, &context)
}
