//! Playback URL reconstruction for cipher-protected stream entries

use crate::decipher::CatalogState;
use crate::error::DescrambleError;
use url::Url;

/// The cipher-protected form of a stream URL: a bare URL, the scrambled
/// signature, and the query parameter name the deciphered signature must be
/// returned under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherFragment {
    pub url: String,
    pub signature: String,
    pub signature_param: String,
}

impl CipherFragment {
    /// Parse the `&`-separated, percent-encoded key/value fragment a stream
    /// entry carries instead of a direct URL
    pub fn parse(fragment: &str) -> Result<Self, DescrambleError> {
        let mut url = None;
        let mut signature = None;
        let mut signature_param = None;
        for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
            match key.as_ref() {
                "url" => url = Some(value.into_owned()),
                "s" => signature = Some(value.into_owned()),
                "sp" => signature_param = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(CipherFragment {
            url: url.ok_or_else(|| missing("url"))?,
            signature: signature.ok_or_else(|| missing("s"))?,
            signature_param: signature_param.ok_or_else(|| missing("sp"))?,
        })
    }
}

fn missing(key: &str) -> DescrambleError {
    DescrambleError::StructuralMismatch(format!("cipher fragment is missing {key:?}"))
}

/// Rebuild the playable URL for one stream entry.
///
/// Cipher-protected entries get their signature deciphered and appended
/// under the fragment's parameter name; direct entries pass through. Either
/// way the `n` query value, if present, is replaced with its decoded form.
pub fn resolve_stream_url(
    catalog: &CatalogState,
    direct_url: Option<&str>,
    cipher: Option<&str>,
) -> Result<String, DescrambleError> {
    let url = match (cipher, direct_url) {
        (Some(fragment), _) => {
            let fragment = CipherFragment::parse(fragment)?;
            let deciphered = catalog.decode_signature(&fragment.signature)?;
            format!("{}&{}={}", fragment.url, fragment.signature_param, deciphered)
        }
        (None, Some(direct)) => direct.to_string(),
        (None, None) => {
            return Err(DescrambleError::StructuralMismatch(
                "stream entry carries neither url nor cipher".to_string(),
            ))
        }
    };
    apply_n_decode(catalog, &url)
}

/// Replace the `n` query value with its decoded form, leaving every other
/// parameter untouched. URLs without an `n` parameter come back unchanged.
pub fn apply_n_decode(catalog: &CatalogState, url: &str) -> Result<String, DescrambleError> {
    let mut parsed = Url::parse(url)?;
    let n = parsed
        .query_pairs()
        .find(|(key, _)| key == "n")
        .map(|(_, value)| value.into_owned());
    let Some(n) = n else {
        return Ok(parsed.into());
    };

    let decoded = catalog.decode_n(&n);
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(key, value)| {
            if key == "n" {
                (key.into_owned(), decoded.clone())
            } else {
                (key.into_owned(), value.into_owned())
            }
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(parsed.into())
}
