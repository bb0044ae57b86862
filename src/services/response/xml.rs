use super::{
    Attribute, FAILED_SOP_SEQUENCE, FAILURE_REASON, REFERENCED_SOP_CLASS_UID,
    REFERENCED_SOP_INSTANCE_UID, REFERENCED_SOP_SEQUENCE, RETRIEVE_URL, ResponseError,
    StoreResponse, WARNING_REASON,
};
use crate::models::{FailureRecord, SuccessRecord};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

const NATIVE_DICOM_MODEL: &str = "NativeDicomModel";
const XMLNS: &str = "http://dicom.nema.org/PS3.19/models/NativeDICOM";
const XMLNS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str =
    "http://dicom.nema.org/PS3.19/models/NativeDICOM http://dicom.nema.org/PS3.19/models/NativeDICOM.xsd";

type XmlResult = std::io::Result<()>;

/// Renders the result as a Native DICOM Model document (PS3.19).
pub fn render_xml(response: &StoreResponse<'_>) -> Result<Vec<u8>, ResponseError> {
    let mut writer = Writer::new(Vec::new());
    write_document(&mut writer, response).map_err(|e| ResponseError::Xml(e.to_string()))?;
    Ok(writer.into_inner())
}

fn write_document(writer: &mut Writer<Vec<u8>>, response: &StoreResponse<'_>) -> XmlResult {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let root = BytesStart::new(NATIVE_DICOM_MODEL).with_attributes([
        ("xmlns", XMLNS),
        ("xmlns:xsi", XMLNS_XSI),
        ("xsi:schemaLocation", SCHEMA_LOCATION),
    ]);
    writer.write_event(Event::Start(root))?;

    if let Some(url) = response.retrieve_url {
        write_string(writer, RETRIEVE_URL, url)?;
    }
    write_sequence(writer, FAILED_SOP_SEQUENCE, response.failures, write_failure)?;
    write_sequence(writer, REFERENCED_SOP_SEQUENCE, response.successes, write_success)?;

    writer.write_event(Event::End(BytesEnd::new(NATIVE_DICOM_MODEL)))
}

fn write_failure(writer: &mut Writer<Vec<u8>>, record: &FailureRecord) -> XmlResult {
    write_string(writer, REFERENCED_SOP_CLASS_UID, &record.sop_class_uid)?;
    write_string(writer, REFERENCED_SOP_INSTANCE_UID, &record.sop_instance_uid)?;
    write_string(writer, FAILURE_REASON, &record.reason.code().to_string())
}

fn write_success(writer: &mut Writer<Vec<u8>>, record: &SuccessRecord) -> XmlResult {
    write_string(writer, REFERENCED_SOP_CLASS_UID, &record.sop_class_uid)?;
    write_string(writer, REFERENCED_SOP_INSTANCE_UID, &record.sop_instance_uid)?;
    if let Some(url) = &record.retrieve_url {
        write_string(writer, RETRIEVE_URL, url)?;
    }
    if let Some(code) = record.warning {
        write_string(writer, WARNING_REASON, &code.to_string())?;
    }
    Ok(())
}

fn attribute_start(attr: Attribute) -> BytesStart<'static> {
    BytesStart::new("DicomAttribute").with_attributes([
        ("tag", attr.tag),
        ("vr", attr.vr),
        ("keyword", attr.keyword),
    ])
}

fn write_string(writer: &mut Writer<Vec<u8>>, attr: Attribute, value: &str) -> XmlResult {
    if value.is_empty() {
        return writer.write_event(Event::Empty(attribute_start(attr)));
    }
    writer.write_event(Event::Start(attribute_start(attr)))?;
    writer.write_event(Event::Start(
        BytesStart::new("Value").with_attributes([("number", "1")]),
    ))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new("Value")))?;
    writer.write_event(Event::End(BytesEnd::new("DicomAttribute")))
}

fn write_sequence<T>(
    writer: &mut Writer<Vec<u8>>,
    attr: Attribute,
    items: &[T],
    write_item: fn(&mut Writer<Vec<u8>>, &T) -> XmlResult,
) -> XmlResult {
    if items.is_empty() {
        return writer.write_event(Event::Empty(attribute_start(attr)));
    }
    writer.write_event(Event::Start(attribute_start(attr)))?;
    for (index, item) in items.iter().enumerate() {
        let number = (index + 1).to_string();
        writer.write_event(Event::Start(
            BytesStart::new("Item").with_attributes([("number", number.as_str())]),
        ))?;
        write_item(writer, item)?;
        writer.write_event(Event::End(BytesEnd::new("Item")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("DicomAttribute")))
}
