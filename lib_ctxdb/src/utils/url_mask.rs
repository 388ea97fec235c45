use url::Url;

/// Replaces the password of a connection URL with `*****` so it can be logged.
///
/// Strings that do not parse as URLs, or carry no password, come back unchanged.
pub fn mask_url_password(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("*****")).is_ok() {
                url.to_string()
            } else {
                raw.to_string()
            }
        }
        _ => raw.to_string(),
    }
}
