use crate::RemoteError;
use bagprep_schema::ServiceConfig;

/// Base URL and optional bearer token of one remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub url: String,
    pub auth_token: Option<String>,
}

impl ServiceEndpoint {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    /// Build an endpoint from a `[dist_service]` or `[metadata_service]`
    /// table. `name` is used in the error when no endpoint is configured.
    pub fn from_config(cfg: &ServiceConfig, name: &str) -> Result<Self, RemoteError> {
        let url = cfg
            .service_endpoint
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                RemoteError::Config(format!("{name}: missing property: service_endpoint"))
            })?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(RemoteError::Config(format!(
                "{name}: service_endpoint is not an HTTP URL: {url}"
            )));
        }
        let mut ep = Self::new(url);
        if let Some(token) = &cfg.auth_token {
            ep = ep.with_token(token);
        }
        Ok(ep)
    }

    /// `<url>/<segments joined by '/'>`.
    pub fn join(&self, segments: &[&str]) -> String {
        let mut out = self.url.clone();
        for s in segments {
            out.push('/');
            out.push_str(s.trim_matches('/'));
        }
        out
    }
}
