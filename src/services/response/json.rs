use super::{
    Attribute, FAILED_SOP_SEQUENCE, FAILURE_REASON, REFERENCED_SOP_CLASS_UID,
    REFERENCED_SOP_INSTANCE_UID, REFERENCED_SOP_SEQUENCE, RETRIEVE_URL, StoreResponse,
    WARNING_REASON,
};
use crate::models::{FailureRecord, SuccessRecord};
use serde_json::{Map, Value, json};

/// Renders the result as a DICOM JSON dataset (PS3.18 F.2).
pub fn render_json(response: &StoreResponse<'_>) -> Value {
    let mut root = Map::new();
    if let Some(url) = response.retrieve_url {
        insert_string(&mut root, RETRIEVE_URL, url);
    }
    insert_sequence(
        &mut root,
        FAILED_SOP_SEQUENCE,
        response.failures.iter().map(failure_item).collect(),
    );
    insert_sequence(
        &mut root,
        REFERENCED_SOP_SEQUENCE,
        response.successes.iter().map(success_item).collect(),
    );
    Value::Object(root)
}

fn failure_item(record: &FailureRecord) -> Value {
    let mut item = Map::new();
    insert_string(&mut item, REFERENCED_SOP_CLASS_UID, &record.sop_class_uid);
    insert_string(&mut item, REFERENCED_SOP_INSTANCE_UID, &record.sop_instance_uid);
    insert_number(&mut item, FAILURE_REASON, record.reason.code());
    Value::Object(item)
}

fn success_item(record: &SuccessRecord) -> Value {
    let mut item = Map::new();
    insert_string(&mut item, REFERENCED_SOP_CLASS_UID, &record.sop_class_uid);
    insert_string(&mut item, REFERENCED_SOP_INSTANCE_UID, &record.sop_instance_uid);
    if let Some(url) = &record.retrieve_url {
        insert_string(&mut item, RETRIEVE_URL, url);
    }
    if let Some(code) = record.warning {
        insert_number(&mut item, WARNING_REASON, code);
    }
    Value::Object(item)
}

fn insert_string(map: &mut Map<String, Value>, attr: Attribute, value: &str) {
    let element = if value.is_empty() {
        json!({ "vr": attr.vr })
    } else {
        json!({ "vr": attr.vr, "Value": [value] })
    };
    map.insert(attr.tag.to_string(), element);
}

fn insert_number(map: &mut Map<String, Value>, attr: Attribute, value: u16) {
    map.insert(
        attr.tag.to_string(),
        json!({ "vr": attr.vr, "Value": [value] }),
    );
}

fn insert_sequence(map: &mut Map<String, Value>, attr: Attribute, items: Vec<Value>) {
    let element = if items.is_empty() {
        json!({ "vr": attr.vr })
    } else {
        json!({ "vr": attr.vr, "Value": items })
    };
    map.insert(attr.tag.to_string(), element);
}
