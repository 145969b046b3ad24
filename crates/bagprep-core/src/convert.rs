//! POD to NERDm conversion.

use crate::CoreError;
use bagprep_schema::nerdm::{
    component_id, init_resource_record, ACCESSPAGE_TYPE, CHECKSUMFILE_TYPE, DATAFILE_TYPE,
    DISTRIBUTION_TYPE, DOWNLOADABLE_TYPE, NERDPUB_DEF,
};
use bagprep_schema::{NerdError, DEFAULT_VERSION};
use bagprep_store::checksum_subject;
use serde_json::{json, Map, Value};

/// Turns a POD dataset record into a NERDm resource record.
pub trait PodConverter: Send + Sync {
    fn convert(&self, pod: &Value, minted_id: &str) -> Result<Value, CoreError>;
}

/// POD fields copied to the resource record under the same name.
const COPIED_FIELDS: [&str; 10] = [
    "title",
    "keyword",
    "contactPoint",
    "accessLevel",
    "landingPage",
    "license",
    "modified",
    "issued",
    "publisher",
    "language",
];

/// A field-mapping converter covering the POD properties the pipeline
/// needs: descriptive fields, the submission identifier, and distributions.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicPodConverter;

impl PodConverter for BasicPodConverter {
    fn convert(&self, pod: &Value, minted_id: &str) -> Result<Value, CoreError> {
        let Value::Object(pod) = pod else {
            return Err(NerdError::type_error("object", pod, "POD Dataset").into());
        };
        let mut rec = match init_resource_record(minted_id, DEFAULT_VERSION) {
            Value::Object(m) => m,
            _ => Map::new(),
        };

        for key in COPIED_FIELDS {
            if let Some(v) = pod.get(key) {
                rec.insert(key.to_owned(), v.clone());
            }
        }
        if let Some(ediid) = pod.get("identifier") {
            rec.insert("ediid".into(), ediid.clone());
        }
        match pod.get("description") {
            Some(Value::String(s)) => {
                rec.insert("description".into(), json!([s]));
            }
            Some(v) => {
                rec.insert("description".into(), v.clone());
            }
            None => {}
        }

        let ediid = pod.get("identifier").and_then(Value::as_str);
        let mut components = Vec::new();
        let mut pages = 0;
        if let Some(dists) = pod.get("distribution") {
            let Value::Array(dists) = dists else {
                return Err(NerdError::type_error("list", dists, "distribution").into());
            };
            for dist in dists {
                if let Some(url) = dist.get("downloadURL").and_then(Value::as_str) {
                    components.push(file_component(dist, url, ediid)?);
                } else if dist.get("accessURL").is_some() {
                    pages += 1;
                    components.push(access_page(dist, pages));
                }
            }
        }
        rec.insert("components".into(), Value::Array(components));
        Ok(Value::Object(rec))
    }
}

/// The file path a download URL points to: whatever follows the dataset
/// identifier segment, or else the last path segment. A URL that yields no
/// usable relative path is rejected.
pub fn filepath_from_url(url: &str, ediid: Option<&str>) -> Result<String, CoreError> {
    let path = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest.split_once('/').map_or("", |(_, p)| p));
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let marker = ediid.filter(|i| !i.is_empty()).map(|id| format!("{id}/"));
    let filepath = match marker.as_deref().and_then(|m| path.find(m).map(|i| i + m.len())) {
        Some(start) => &path[start..],
        None => path.rsplit('/').next().unwrap_or_default(),
    };
    if filepath.is_empty() || filepath.split('/').any(|seg| matches!(seg, "" | "." | "..")) {
        return Err(CoreError::Validation(format!(
            "download URL does not name a file: {url}"
        )));
    }
    Ok(filepath.to_owned())
}

fn file_component(dist: &Value, url: &str, ediid: Option<&str>) -> Result<Value, CoreError> {
    let filepath = filepath_from_url(url, ediid)?;
    let (marker, ext) = if checksum_subject(&filepath).is_some() {
        (CHECKSUMFILE_TYPE, "ChecksumFile")
    } else {
        (DATAFILE_TYPE, "DataFile")
    };
    let mut comp = Map::new();
    comp.insert("@id".into(), json!(component_id(&filepath)));
    comp.insert(
        "@type".into(),
        json!([marker, DOWNLOADABLE_TYPE, DISTRIBUTION_TYPE]),
    );
    comp.insert("filepath".into(), json!(filepath));
    comp.insert("downloadURL".into(), json!(url));
    for key in ["mediaType", "title", "description", "format"] {
        if let Some(v) = dist.get(key) {
            comp.insert(key.to_owned(), v.clone());
        }
    }
    comp.insert(
        "_extensionSchemas".into(),
        json!([format!("{NERDPUB_DEF}{ext}")]),
    );
    Ok(Value::Object(comp))
}

fn access_page(dist: &Value, n: usize) -> Value {
    let mut comp = Map::new();
    comp.insert("@id".into(), json!(format!("#access/{n}")));
    comp.insert("@type".into(), json!([ACCESSPAGE_TYPE, DISTRIBUTION_TYPE]));
    for key in ["accessURL", "title", "description", "format"] {
        if let Some(v) = dist.get(key) {
            comp.insert(key.to_owned(), v.clone());
        }
    }
    comp.insert(
        "_extensionSchemas".into(),
        json!([format!("{NERDPUB_DEF}AccessPage")]),
    );
    Value::Object(comp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagprep_schema::ComponentKind;

    fn sample_pod() -> Value {
        json!({
            "identifier": "3A1EE2F169DD3B8CE0531A570681DB5D1491",
            "title": "Goober Trials",
            "description": "Results of the goober trials",
            "keyword": ["goober"],
            "accessLevel": "public",
            "distribution": [
                {"downloadURL": "https://data.nist.gov/od/ds/3A1EE2F169DD3B8CE0531A570681DB5D1491/trial1.json",
                 "mediaType": "application/json"},
                {"downloadURL": "https://data.nist.gov/od/ds/3A1EE2F169DD3B8CE0531A570681DB5D1491/trial3/trial3a.json.sha256"},
                {"accessURL": "https://doi.org/10.18434/FAKE", "title": "DOI landing"}
            ]
        })
    }

    #[test]
    fn converts_descriptive_fields() {
        let rec = BasicPodConverter
            .convert(&sample_pod(), "ark:/88434/mds2-1491")
            .unwrap();
        assert_eq!(rec["@id"], "ark:/88434/mds2-1491");
        assert_eq!(rec["ediid"], "3A1EE2F169DD3B8CE0531A570681DB5D1491");
        assert_eq!(rec["title"], "Goober Trials");
        assert_eq!(rec["description"], json!(["Results of the goober trials"]));
        assert_eq!(rec["version"], DEFAULT_VERSION);
        bagprep_schema::nerdm::check_schema(&rec).unwrap();
    }

    #[test]
    fn converts_distributions_to_components() {
        let rec = BasicPodConverter.convert(&sample_pod(), "x").unwrap();
        let comps = rec["components"].as_array().unwrap();
        assert_eq!(comps.len(), 3);
        assert_eq!(comps[0]["filepath"], "trial1.json");
        assert_eq!(ComponentKind::of(&comps[0]).unwrap(), ComponentKind::DataFile);
        assert_eq!(comps[0]["mediaType"], "application/json");
        assert_eq!(comps[1]["filepath"], "trial3/trial3a.json.sha256");
        assert_eq!(ComponentKind::of(&comps[1]).unwrap(), ComponentKind::ChecksumFile);
        assert_eq!(ComponentKind::of(&comps[2]).unwrap(), ComponentKind::Other);
        assert!(comps[2].get("filepath").is_none());
    }

    #[test]
    fn empty_pod_has_no_components() {
        let rec = BasicPodConverter.convert(&json!({}), "x").unwrap();
        assert_eq!(rec["components"], json!([]));
    }

    #[test]
    fn non_list_distribution_is_type_error() {
        let err = BasicPodConverter
            .convert(&json!({"distribution": {}}), "x")
            .unwrap_err();
        assert!(matches!(err, CoreError::Nerd(NerdError::Type { .. })));
    }

    #[test]
    fn filepath_extraction() {
        assert_eq!(
            filepath_from_url("https://h/od/ds/ID/a/b.txt?x=1", Some("ID")).unwrap(),
            "a/b.txt"
        );
        assert_eq!(
            filepath_from_url("https://h/files/c.csv", Some("ID")).unwrap(),
            "c.csv"
        );
        assert_eq!(filepath_from_url("https://h/files/c.csv", None).unwrap(), "c.csv");
    }

    #[test]
    fn url_without_file_is_rejected() {
        for url in [
            "https://h/files/",
            "https://h/od/ds/ID/a/",
            "https://h/od/ds/ID/../b.txt",
            "https://h/od/ds/ID/a/./b.txt",
            "https://h",
        ] {
            assert!(
                matches!(filepath_from_url(url, Some("ID")), Err(CoreError::Validation(_))),
                "{url} accepted"
            );
        }

        let pod = json!({"identifier": "ID", "distribution": [{"downloadURL": "https://h/od/ds/ID/"}]});
        let err = BasicPodConverter.convert(&pod, "x").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
