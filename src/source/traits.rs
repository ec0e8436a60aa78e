use reqwest::header::HeaderMap;
use url::Url;

/// Decides which headers an upstream fetch carries.
///
/// Policies run in order over the same map, so a later policy may override an
/// earlier one. Implementations must be cheap: they run once per relay request.
pub trait HeaderPolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn apply(&self, referer: &Url, headers: &mut HeaderMap);
}
