use crate::{DistributionService, HeadBagInfo, MetadataService, RemoteError, ServiceEndpoint};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// GET `url`. A 404 yields `Ok(None)`; any other failure is an error.
fn get(
    agent: &ureq::Agent,
    ep: &ServiceEndpoint,
    url: &str,
) -> Result<Option<ureq::http::Response<ureq::Body>>, RemoteError> {
    let mut req = agent.get(url).header("User-Agent", crate::USER_AGENT);
    if let Some(ref token) = ep.auth_token {
        req = req.header("Authorization", &format!("Bearer {token}"));
    }
    let resp = match req.call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(404)) => return Ok(None),
        Err(ureq::Error::StatusCode(code)) => {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }
        Err(e) => return Err(RemoteError::Http(e.to_string())),
    };

    let code = resp.status().as_u16();
    if code == 404 {
        return Ok(None);
    }
    if code >= 400 {
        return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
    }
    Ok(Some(resp))
}

fn get_json(
    agent: &ureq::Agent,
    ep: &ServiceEndpoint,
    url: &str,
) -> Result<Option<Value>, RemoteError> {
    let Some(resp) = get(agent, ep, url)? else {
        return Ok(None);
    };
    let mut body = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| RemoteError::Http(e.to_string()))?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Client for the distribution service's AIP endpoints:
///
/// - `GET <ep>/<id>/_aip/_v/<version|latest>/_head`: head bag description
///   (a JSON list; the first entry is used)
/// - `GET <ep>/_aip/<name>`: serialized bag bytes
pub struct HttpDistribClient {
    endpoint: ServiceEndpoint,
    agent: ureq::Agent,
}

impl HttpDistribClient {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { endpoint, agent }
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }
}

impl DistributionService for HttpDistribClient {
    fn describe_head(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<HeadBagInfo>, RemoteError> {
        let version = version.unwrap_or("latest");
        let url = self.endpoint.join(&[id, "_aip", "_v", version, "_head"]);
        debug!("GET {url}");
        let first = match get_json(&self.agent, &self.endpoint, &url)? {
            None => return Ok(None),
            Some(Value::Array(list)) => match list.into_iter().next() {
                Some(v) => v,
                None => return Ok(None),
            },
            Some(v @ Value::Object(_)) => v,
            Some(other) => {
                return Err(RemoteError::Serialization(format!(
                    "unexpected head bag description from {url}: {other}"
                )))
            }
        };
        Ok(Some(serde_json::from_value(first)?))
    }

    fn save_bag(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, RemoteError> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(RemoteError::Config(format!("invalid bag file name: {name}")));
        }
        if !dest_dir.is_dir() {
            return Err(RemoteError::State(format!(
                "bag destination is not a directory: {}",
                dest_dir.display()
            )));
        }
        let url = self.endpoint.join(&["_aip", name]);
        debug!("GET {url}");
        let resp = get(&self.agent, &self.endpoint, &url)?
            .ok_or_else(|| RemoteError::NotFound(url.clone()))?;

        let dest = dest_dir.join(name);
        let part = dest_dir.join(format!(".{name}.part"));
        let result = (|| -> io::Result<u64> {
            let mut out = File::create(&part)?;
            let n = io::copy(&mut resp.into_body().into_reader(), &mut out)?;
            out.sync_all()?;
            Ok(n)
        })();
        match result {
            Ok(n) => {
                fs::rename(&part, &dest)?;
                debug!("saved {n} bytes to {}", dest.display());
                Ok(dest)
            }
            Err(e) => {
                let _ = fs::remove_file(&part);
                Err(RemoteError::Http(format!("download of {url} failed: {e}")))
            }
        }
    }
}

/// Client for the metadata repository: `GET <ep>/<id>` returns the latest
/// public NERDm record.
pub struct HttpMetadataClient {
    endpoint: ServiceEndpoint,
    agent: ureq::Agent,
}

impl HttpMetadataClient {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { endpoint, agent }
    }
}

impl MetadataService for HttpMetadataClient {
    fn describe(&self, id: &str) -> Result<Option<Value>, RemoteError> {
        let url = self.endpoint.join(&[id]);
        debug!("GET {url}");
        get_json(&self.agent, &self.endpoint, &url)
    }
}
