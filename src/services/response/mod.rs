//! STOW-RS result documents (PS3.18 §10.5.3).
//!
//! Both renderings carry the same attributes:
//! RetrieveURL, FailedSOPSequence and ReferencedSOPSequence at the root.

mod json;
mod xml;

use crate::models::{FailureRecord, SuccessRecord};
use thiserror::Error;

pub use json::render_json;
pub use xml::render_xml;

pub const DICOM_XML: &str = "application/dicom+xml";

/// A DICOM attribute as it appears in both renderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub tag: &'static str,
    pub vr: &'static str,
    pub keyword: &'static str,
}

pub const RETRIEVE_URL: Attribute = Attribute {
    tag: "00081190",
    vr: "UR",
    keyword: "RetrieveURL",
};
pub const FAILED_SOP_SEQUENCE: Attribute = Attribute {
    tag: "00081198",
    vr: "SQ",
    keyword: "FailedSOPSequence",
};
pub const REFERENCED_SOP_SEQUENCE: Attribute = Attribute {
    tag: "00081199",
    vr: "SQ",
    keyword: "ReferencedSOPSequence",
};
pub const REFERENCED_SOP_CLASS_UID: Attribute = Attribute {
    tag: "00081150",
    vr: "UI",
    keyword: "ReferencedSOPClassUID",
};
pub const REFERENCED_SOP_INSTANCE_UID: Attribute = Attribute {
    tag: "00081155",
    vr: "UI",
    keyword: "ReferencedSOPInstanceUID",
};
pub const FAILURE_REASON: Attribute = Attribute {
    tag: "00081197",
    vr: "US",
    keyword: "FailureReason",
};
pub const WARNING_REASON: Attribute = Attribute {
    tag: "00081196",
    vr: "US",
    keyword: "WarningReason",
};

#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("cannot serialize JSON response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot serialize XML response: {0}")]
    Xml(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Xml,
}

impl ResponseFormat {
    /// XML only for an exact (case-insensitive) `application/dicom+xml`
    /// Accept value; everything else, wildcards included, gets JSON.
    pub fn from_accept(accept: Option<&str>) -> Self {
        match accept {
            Some(value) if value.trim().eq_ignore_ascii_case(DICOM_XML) => ResponseFormat::Xml,
            _ => ResponseFormat::Json,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ResponseFormat::Json => "application/json",
            ResponseFormat::Xml => "application/xml",
        }
    }
}

/// Inputs of a result document.
#[derive(Debug, Clone, Copy)]
pub struct StoreResponse<'a> {
    pub retrieve_url: Option<&'a str>,
    pub successes: &'a [SuccessRecord],
    pub failures: &'a [FailureRecord],
}

impl StoreResponse<'_> {
    pub fn render(&self, format: ResponseFormat) -> Result<Vec<u8>, ResponseError> {
        match format {
            ResponseFormat::Json => Ok(serde_json::to_vec(&render_json(self))?),
            ResponseFormat::Xml => render_xml(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureReason;
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;
    use std::collections::BTreeSet;

    type Tuple = (String, String, Option<String>, Option<u16>);

    fn sample() -> (Vec<SuccessRecord>, Vec<FailureRecord>) {
        let successes = vec![
            SuccessRecord {
                sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".into(),
                sop_instance_uid: "1.2.3.1".into(),
                retrieve_url: Some("http://pacs/wado/studies/1.2/series/1.2.3/instances/1.2.3.1".into()),
                warning: None,
            },
            SuccessRecord {
                sop_class_uid: "1.2.840.10008.5.1.4.1.1.4".into(),
                sop_instance_uid: "1.2.3.2".into(),
                retrieve_url: Some("http://pacs/wado/studies/1.2/series/1.2.3/instances/1.2.3.2".into()),
                warning: Some(0xB000),
            },
        ];
        let failures = vec![FailureRecord {
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.7".into(),
            sop_instance_uid: "9.9.9".into(),
            reason: FailureReason::StudyUidMismatch,
        }];
        (successes, failures)
    }

    fn json_tuples(doc: &serde_json::Value, seq: &str, field: &str) -> BTreeSet<Tuple> {
        let first = |item: &serde_json::Value, tag: &str| item[tag]["Value"][0].clone();
        doc[seq]["Value"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        (
                            first(item, "00081150").as_str().unwrap().to_string(),
                            first(item, "00081155").as_str().unwrap().to_string(),
                            first(item, "00081190").as_str().map(str::to_string),
                            first(item, field).as_u64().map(|v| v as u16),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Collects (sequence tag, item values by tag) from the XML rendering.
    fn xml_tuples(doc: &str, seq: &str, field: &str) -> BTreeSet<Tuple> {
        let mut reader = Reader::from_str(doc);
        let mut stack: Vec<String> = Vec::new();
        let mut items: Vec<std::collections::HashMap<String, String>> = Vec::new();
        let mut in_seq = false;
        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) => {
                    if e.name().as_ref() == b"DicomAttribute" {
                        let tag = e.try_get_attribute("tag").unwrap().unwrap();
                        let tag = String::from_utf8(tag.value.to_vec()).unwrap();
                        if tag == seq {
                            in_seq = true;
                        }
                        stack.push(tag);
                    } else if e.name().as_ref() == b"Item" && in_seq && stack.len() == 1 {
                        items.push(Default::default());
                    }
                }
                Event::End(e) => {
                    if e.name().as_ref() == b"DicomAttribute" {
                        if stack.pop().as_deref() == Some(seq) {
                            in_seq = false;
                        }
                    }
                }
                Event::Text(t) => {
                    if in_seq && stack.len() == 2 {
                        let text = std::str::from_utf8(&t).unwrap().to_string();
                        let tag = stack[1].clone();
                        items.last_mut().unwrap().insert(tag, text);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        items
            .into_iter()
            .map(|m| {
                (
                    m["00081150"].clone(),
                    m["00081155"].clone(),
                    m.get("00081190").cloned(),
                    m.get(field).map(|v| v.parse().unwrap()),
                )
            })
            .collect()
    }

    #[test]
    fn test_renderings_are_equivalent() {
        let (successes, failures) = sample();
        let response = StoreResponse {
            retrieve_url: Some("http://pacs/wado/studies/1.2"),
            successes: &successes,
            failures: &failures,
        };

        let json: serde_json::Value =
            serde_json::from_slice(&response.render(ResponseFormat::Json).unwrap()).unwrap();
        let xml = String::from_utf8(response.render(ResponseFormat::Xml).unwrap()).unwrap();

        let json_ok = json_tuples(&json, "00081199", "00081196");
        let xml_ok = xml_tuples(&xml, "00081199", "00081196");
        assert_eq!(json_ok.len(), 2);
        assert_eq!(json_ok, xml_ok);

        let json_failed = json_tuples(&json, "00081198", "00081197");
        let xml_failed = xml_tuples(&xml, "00081198", "00081197");
        assert_eq!(json_failed.len(), 1);
        assert_eq!(json_failed, xml_failed);
        assert!(json_failed.iter().all(|t| t.3 == Some(0x0910)));

        assert_eq!(json["00081190"]["Value"][0], "http://pacs/wado/studies/1.2");
        assert!(xml.contains("<Value number=\"1\">http://pacs/wado/studies/1.2</Value>"));
    }

    #[test]
    fn test_accept_negotiation() {
        assert_eq!(
            ResponseFormat::from_accept(Some("Application/DICOM+XML")),
            ResponseFormat::Xml
        );
        assert_eq!(ResponseFormat::from_accept(Some("*/*")), ResponseFormat::Json);
        assert_eq!(
            ResponseFormat::from_accept(Some("application/dicom+json")),
            ResponseFormat::Json
        );
        assert_eq!(ResponseFormat::from_accept(None), ResponseFormat::Json);
        assert_eq!(ResponseFormat::Xml.content_type(), "application/xml");
    }
}
