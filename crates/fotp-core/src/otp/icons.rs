//! Built-in issuer-to-icon table.
//!
//! Resolves a token's `image_default` from its effective issuer. Keys and
//! issuers are compared in normalised form (lowercase ASCII alphanumerics
//! only) and the longest key contained in the issuer wins.

/// Scheme prefix for icon references produced by the built-in table.
pub const ICON_SCHEME: &str = "icon://";

/// (normalised issuer key, icon name)
const ISSUER_ICONS: &[(&str, &str)] = &[
    ("amazon", "fa-amazon"),
    ("amazonwebservices", "fa-aws"),
    ("aws", "fa-aws"),
    ("apple", "fa-apple"),
    ("atlassian", "fa-atlassian"),
    ("bitbucket", "fa-bitbucket"),
    ("bitcoin", "fa-bitcoin"),
    ("bitwarden", "fa-shield-alt"),
    ("cloudflare", "fa-cloudflare"),
    ("coinbase", "fa-bitcoin"),
    ("digitalocean", "fa-digital-ocean"),
    ("discord", "fa-discord"),
    ("dropbox", "fa-dropbox"),
    ("facebook", "fa-facebook"),
    ("fedora", "fa-fedora"),
    ("github", "fa-github"),
    ("gitlab", "fa-gitlab"),
    ("google", "fa-google"),
    ("googledrive", "fa-google-drive"),
    ("instagram", "fa-instagram"),
    ("linkedin", "fa-linkedin"),
    ("linode", "fa-linode"),
    ("mailchimp", "fa-mailchimp"),
    ("microsoft", "fa-microsoft"),
    ("mozilla", "fa-firefox"),
    ("npm", "fa-npm"),
    ("openid", "fa-openid"),
    ("paypal", "fa-paypal"),
    ("redhat", "fa-redhat"),
    ("reddit", "fa-reddit"),
    ("slack", "fa-slack"),
    ("steam", "fa-steam"),
    ("stripe", "fa-stripe"),
    ("twitch", "fa-twitch"),
    ("twitter", "fa-twitter"),
    ("ubuntu", "fa-ubuntu"),
    ("wordpress", "fa-wordpress"),
];

/// Lowercase and keep only ASCII letters and digits.
pub fn normalise_issuer(issuer: &str) -> String {
    issuer
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Icon name for an issuer, if the built-in table has one.
pub fn icon_name_for(issuer: &str) -> Option<&'static str> {
    let needle = normalise_issuer(issuer);
    if needle.is_empty() {
        return None;
    }
    ISSUER_ICONS
        .iter()
        .filter(|(key, _)| needle.contains(key))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, icon)| *icon)
}

/// Icon reference (`icon://<name>`) for an issuer, if one matches.
pub fn default_image_for(issuer: &str) -> Option<String> {
    icon_name_for(issuer).map(|name| format!("{}{}", ICON_SCHEME, name))
}
