//! XML interchange for a whole model.
//!
//! ```xml
//! <archimateModel id="m1" name="Bank">
//!   <description>..</description>
//!   <attributes>{"owner":"EA"}</attributes>
//!   <elements>
//!     <element id="e1" type="Business Actor" name="Customer" valid_from="2024-01-01">
//!       <attributes>{}</attributes>
//!       <tags>{}</tags>
//!     </element>
//!   </elements>
//!   <relationships>
//!     <relationship id="r1" type="Serving" source="e2" target="e1" name=""/>
//!   </relationships>
//! </archimateModel>
//! ```
//!
//! Attribute and tag maps travel as JSON text inside their child nodes.
//!
//! The CSV form is a pair of tables, one for elements and one for
//! relationships, with the maps in `attributes_json` and `tags_json` columns.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::{Attributes, ModelSnapshot, Tags};

pub const ROOT: &str = "archimateModel";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedElement {
    pub id: String,
    pub type_name: String,
    pub name: String,
    pub attributes: Attributes,
    pub tags: Tags,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedRelationship {
    pub id: String,
    pub type_name: String,
    pub source_element_id: String,
    pub target_element_id: String,
    pub name: String,
    pub attributes: Attributes,
    pub tags: Tags,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InterchangeFormat {
    #[default]
    Xml,
    Csv,
}

impl InterchangeFormat {
    /// Version message recorded when a graph in this format is imported.
    pub fn import_message(self) -> &'static str {
        match self {
            InterchangeFormat::Xml => "Model imported from XML",
            InterchangeFormat::Csv => "Model imported from CSV",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedGraph {
    pub model_id: Option<String>,
    pub format: InterchangeFormat,
    pub elements: Vec<ImportedElement>,
    pub relationships: Vec<ImportedRelationship>,
}

pub fn export_xml(snapshot: &ModelSnapshot) -> ModelResult<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let model = &snapshot.model;

    let mut root = BytesStart::new(ROOT);
    root.push_attribute(("id", model.id.as_str()));
    root.push_attribute(("name", model.name.as_str()));
    write(&mut writer, Event::Start(root))?;
    text_node(&mut writer, "description", &model.description)?;
    json_node(&mut writer, "attributes", &model.attributes)?;

    write(&mut writer, Event::Start(BytesStart::new("elements")))?;
    for element in &snapshot.elements {
        let mut node = BytesStart::new("element");
        node.push_attribute(("id", element.id.as_str()));
        node.push_attribute(("type", element.type_name.as_str()));
        node.push_attribute(("name", element.name.as_str()));
        push_validity(&mut node, &element.valid_from, &element.valid_to);
        write(&mut writer, Event::Start(node))?;
        json_node(&mut writer, "attributes", &element.attributes)?;
        json_node(&mut writer, "tags", &element.tags)?;
        write(&mut writer, Event::End(BytesEnd::new("element")))?;
    }
    write(&mut writer, Event::End(BytesEnd::new("elements")))?;

    write(&mut writer, Event::Start(BytesStart::new("relationships")))?;
    for rel in &snapshot.relationships {
        let mut node = BytesStart::new("relationship");
        node.push_attribute(("id", rel.id.as_str()));
        node.push_attribute(("type", rel.type_name.as_str()));
        node.push_attribute(("source", rel.source_element_id.as_str()));
        node.push_attribute(("target", rel.target_element_id.as_str()));
        node.push_attribute(("name", rel.name.as_str()));
        push_validity(&mut node, &rel.valid_from, &rel.valid_to);
        write(&mut writer, Event::Start(node))?;
        json_node(&mut writer, "attributes", &rel.attributes)?;
        json_node(&mut writer, "tags", &rel.tags)?;
        write(&mut writer, Event::End(BytesEnd::new("relationship")))?;
    }
    write(&mut writer, Event::End(BytesEnd::new("relationships")))?;
    write(&mut writer, Event::End(BytesEnd::new(ROOT)))?;

    String::from_utf8(writer.into_inner()).map_err(ModelError::interchange)
}

/// Which map the next text node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Attributes,
    Tags,
}

enum Open {
    Element(ImportedElement),
    Relationship(ImportedRelationship),
}

pub fn parse_xml(xml: &str) -> ModelResult<ImportedGraph> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut graph = ImportedGraph::default();
    let mut seen_root = false;
    let mut open: Option<Open> = None;
    let mut field = Field::None;

    loop {
        let event = reader.read_event().map_err(ModelError::interchange)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = e.name().as_ref().to_vec();
                if !seen_root {
                    if name != ROOT.as_bytes() {
                        return Err(ModelError::interchange(format!(
                            "expected <{}> root, found <{}>",
                            ROOT,
                            String::from_utf8_lossy(&name)
                        )));
                    }
                    seen_root = true;
                    graph.model_id = attr(e, "id")?;
                    continue;
                }
                match name.as_slice() {
                    b"element" => {
                        let element = ImportedElement {
                            id: required_attr(e, "id", "element")?,
                            type_name: required_attr(e, "type", "element")?,
                            name: attr(e, "name")?.unwrap_or_default(),
                            valid_from: attr(e, "valid_from")?.filter(|v| !v.is_empty()),
                            valid_to: attr(e, "valid_to")?.filter(|v| !v.is_empty()),
                            ..Default::default()
                        };
                        if is_empty {
                            graph.elements.push(element);
                        } else {
                            open = Some(Open::Element(element));
                        }
                    }
                    b"relationship" => {
                        let rel = ImportedRelationship {
                            id: required_attr(e, "id", "relationship")?,
                            type_name: required_attr(e, "type", "relationship")?,
                            source_element_id: required_attr(e, "source", "relationship")?,
                            target_element_id: required_attr(e, "target", "relationship")?,
                            name: attr(e, "name")?.unwrap_or_default(),
                            valid_from: attr(e, "valid_from")?.filter(|v| !v.is_empty()),
                            valid_to: attr(e, "valid_to")?.filter(|v| !v.is_empty()),
                            ..Default::default()
                        };
                        if is_empty {
                            graph.relationships.push(rel);
                        } else {
                            open = Some(Open::Relationship(rel));
                        }
                    }
                    b"attributes" if open.is_some() && !is_empty => field = Field::Attributes,
                    b"tags" if open.is_some() && !is_empty => field = Field::Tags,
                    _ => {}
                }
            }
            Event::Text(t) => {
                if field == Field::None {
                    continue;
                }
                let text = t.unescape().map_err(ModelError::interchange)?;
                match (&mut open, field) {
                    (Some(Open::Element(e)), Field::Attributes) => e.attributes = parse_json(&text)?,
                    (Some(Open::Element(e)), Field::Tags) => e.tags = parse_json(&text)?,
                    (Some(Open::Relationship(r)), Field::Attributes) => r.attributes = parse_json(&text)?,
                    (Some(Open::Relationship(r)), Field::Tags) => r.tags = parse_json(&text)?,
                    _ => {}
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"attributes" | b"tags" => field = Field::None,
                b"element" | b"relationship" => match open.take() {
                    Some(Open::Element(element)) => graph.elements.push(element),
                    Some(Open::Relationship(rel)) => graph.relationships.push(rel),
                    None => {}
                },
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(ModelError::interchange(format!("missing <{}> root", ROOT)));
    }
    Ok(graph)
}

// --- CSV ---

pub const ELEMENT_COLUMNS: [&str; 7] = [
    "id",
    "type_name",
    "name",
    "valid_from",
    "valid_to",
    "attributes_json",
    "tags_json",
];

pub const RELATIONSHIP_COLUMNS: [&str; 9] = [
    "id",
    "type_name",
    "source_element_id",
    "target_element_id",
    "name",
    "valid_from",
    "valid_to",
    "attributes_json",
    "tags_json",
];

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsvExport {
    pub model_id: String,
    pub elements_csv: String,
    pub relationships_csv: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ElementRow {
    id: String,
    type_name: String,
    #[serde(default)]
    name: String,
    valid_from: Option<String>,
    valid_to: Option<String>,
    #[serde(default)]
    attributes_json: String,
    #[serde(default)]
    tags_json: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RelationshipRow {
    id: String,
    type_name: String,
    source_element_id: String,
    target_element_id: String,
    #[serde(default)]
    name: String,
    valid_from: Option<String>,
    valid_to: Option<String>,
    #[serde(default)]
    attributes_json: String,
    #[serde(default)]
    tags_json: String,
}

pub fn export_csv(snapshot: &ModelSnapshot) -> ModelResult<CsvExport> {
    let elements = snapshot.elements.iter().map(|e| -> ModelResult<ElementRow> {
        Ok(ElementRow {
            id: e.id.clone(),
            type_name: e.type_name.clone(),
            name: e.name.clone(),
            valid_from: e.valid_from.clone(),
            valid_to: e.valid_to.clone(),
            attributes_json: serde_json::to_string(&e.attributes)?,
            tags_json: serde_json::to_string(&e.tags)?,
        })
    });
    let relationships = snapshot.relationships.iter().map(|r| -> ModelResult<RelationshipRow> {
        Ok(RelationshipRow {
            id: r.id.clone(),
            type_name: r.type_name.clone(),
            source_element_id: r.source_element_id.clone(),
            target_element_id: r.target_element_id.clone(),
            name: r.name.clone(),
            valid_from: r.valid_from.clone(),
            valid_to: r.valid_to.clone(),
            attributes_json: serde_json::to_string(&r.attributes)?,
            tags_json: serde_json::to_string(&r.tags)?,
        })
    });
    Ok(CsvExport {
        model_id: snapshot.model.id.clone(),
        elements_csv: write_table(&ELEMENT_COLUMNS, elements)?,
        relationships_csv: write_table(&RELATIONSHIP_COLUMNS, relationships)?,
    })
}

/// Parse the two CSV tables. Either may be blank. Rows are checked as a
/// whole before anything is returned, so a bad row fails the import.
pub fn parse_csv(elements_csv: &str, relationships_csv: &str) -> ModelResult<ImportedGraph> {
    let mut graph = ImportedGraph {
        format: InterchangeFormat::Csv,
        ..Default::default()
    };

    for (n, row) in read_table::<ElementRow>(elements_csv, "elements")? {
        let id = required_cell(row.id, "elements", n, "id")?;
        let type_name = required_cell(row.type_name, "elements", n, "type_name")?;
        graph.elements.push(ImportedElement {
            id,
            type_name,
            name: row.name,
            attributes: cell_json(&row.attributes_json, "elements", n)?,
            tags: cell_json(&row.tags_json, "elements", n)?,
            valid_from: optional_cell(row.valid_from),
            valid_to: optional_cell(row.valid_to),
        });
    }

    for (n, row) in read_table::<RelationshipRow>(relationships_csv, "relationships")? {
        graph.relationships.push(ImportedRelationship {
            id: required_cell(row.id, "relationships", n, "id")?,
            type_name: required_cell(row.type_name, "relationships", n, "type_name")?,
            source_element_id: required_cell(row.source_element_id, "relationships", n, "source_element_id")?,
            target_element_id: required_cell(row.target_element_id, "relationships", n, "target_element_id")?,
            name: row.name,
            attributes: cell_json(&row.attributes_json, "relationships", n)?,
            tags: cell_json(&row.tags_json, "relationships", n)?,
            valid_from: optional_cell(row.valid_from),
            valid_to: optional_cell(row.valid_to),
        });
    }

    Ok(graph)
}

fn write_table<R: Serialize>(
    columns: &[&str],
    rows: impl Iterator<Item = ModelResult<R>>,
) -> ModelResult<String> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(columns).map_err(ModelError::interchange)?;
    for row in rows {
        writer.serialize(row?).map_err(ModelError::interchange)?;
    }
    let bytes = writer.into_inner().map_err(ModelError::interchange)?;
    String::from_utf8(bytes).map_err(ModelError::interchange)
}

/// Data rows numbered from 1, header excluded.
fn read_table<R: serde::de::DeserializeOwned>(text: &str, table: &str) -> ModelResult<Vec<(usize, R)>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for (i, row) in reader.deserialize::<R>().enumerate() {
        let row = row.map_err(|e| ModelError::interchange(format!("{} row {}: {}", table, i + 1, e)))?;
        rows.push((i + 1, row));
    }
    Ok(rows)
}

fn required_cell(value: String, table: &str, row: usize, column: &str) -> ModelResult<String> {
    if value.trim().is_empty() {
        return Err(ModelError::interchange(format!(
            "{} row {}: '{}' is required",
            table, row, column
        )));
    }
    Ok(value)
}

fn optional_cell(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn cell_json<T: serde::de::DeserializeOwned + Default>(text: &str, table: &str, row: usize) -> ModelResult<T> {
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(text)
        .map_err(|e| ModelError::interchange(format!("{} row {}: invalid JSON payload: {}", table, row, e)))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> ModelResult<()> {
    writer.write_event(event).map_err(ModelError::interchange)
}

fn text_node(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> ModelResult<()> {
    write(writer, Event::Start(BytesStart::new(tag)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(tag)))
}

fn json_node<T: Serialize>(writer: &mut Writer<Vec<u8>>, tag: &str, value: &T) -> ModelResult<()> {
    text_node(writer, tag, &serde_json::to_string(value)?)
}

fn push_validity(node: &mut BytesStart<'_>, from: &Option<String>, to: &Option<String>) {
    if let Some(from) = from {
        node.push_attribute(("valid_from", from.as_str()));
    }
    if let Some(to) = to {
        node.push_attribute(("valid_to", to.as_str()));
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> ModelResult<Option<String>> {
    for attribute in e.attributes() {
        let attribute = attribute.map_err(ModelError::interchange)?;
        if attribute.key.as_ref() == key.as_bytes() {
            let value = attribute.unescape_value().map_err(ModelError::interchange)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required_attr(e: &BytesStart<'_>, key: &str, node: &str) -> ModelResult<String> {
    attr(e, key)?
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ModelError::interchange(format!("<{}> is missing '{}'", node, key)))
}

fn parse_json<T: serde::de::DeserializeOwned + Default>(text: &str) -> ModelResult<T> {
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(text).map_err(|e| ModelError::interchange(format!("invalid JSON payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{element, model, relationship};

    #[test]
    fn exported_model_parses_back() {
        let mut a = element("a", "Business Actor");
        a.name = "Customer & Partner".into();
        a.valid_from = Some("2024-01-01".into());
        a.attributes.insert("owner".into(), serde_json::json!("Sales <EMEA>"));
        a.tags.insert("tier".into(), "gold".into());
        let b = element("b", "Business Service");
        let r = relationship("r1", "Serving", "b", "a");
        let snap = ModelSnapshot {
            model: model("m1"),
            elements: vec![a, b],
            relationships: vec![r],
        };

        let xml = export_xml(&snap).unwrap();
        assert!(xml.starts_with("<archimateModel"));
        let graph = parse_xml(&xml).unwrap();
        assert_eq!(graph.model_id.as_deref(), Some("m1"));
        assert_eq!(graph.elements.len(), 2);
        assert_eq!(graph.elements[0].name, "Customer & Partner");
        assert_eq!(graph.elements[0].valid_from.as_deref(), Some("2024-01-01"));
        assert_eq!(graph.elements[0].attributes["owner"], serde_json::json!("Sales <EMEA>"));
        assert_eq!(graph.elements[0].tags["tier"], "gold");
        assert_eq!(graph.relationships[0].source_element_id, "b");
        assert_eq!(graph.relationships[0].target_element_id, "a");
    }

    #[test]
    fn self_closing_nodes_are_accepted() {
        let xml = r#"<archimateModel id="x">
            <elements><element id="e1" type="Node" name="Host"/></elements>
            <relationships><relationship id="r1" type="Flow" source="e1" target="e2"/></relationships>
        </archimateModel>"#;
        let graph = parse_xml(xml).unwrap();
        assert_eq!(graph.elements[0].id, "e1");
        assert!(graph.elements[0].attributes.is_empty());
        assert_eq!(graph.relationships[0].target_element_id, "e2");
    }

    #[test]
    fn wrong_root_is_rejected() {
        let err = parse_xml("<model/>").unwrap_err();
        assert!(matches!(err, ModelError::Interchange(_)));
    }

    #[test]
    fn missing_type_is_rejected() {
        let xml = r#"<archimateModel><elements><element id="e1"/></elements></archimateModel>"#;
        assert!(parse_xml(xml).is_err());
    }

    #[test]
    fn csv_cells_with_commas_and_quotes_survive() {
        let mut a = element("a", "Business Actor");
        a.name = "Sales, \"EMEA\"".into();
        a.attributes.insert("owner".into(), serde_json::json!({"team": "ea", "size": 4}));
        let snap = ModelSnapshot {
            model: model("m1"),
            elements: vec![a, element("b", "Business Role")],
            relationships: vec![relationship("r1", "Assignment", "a", "b")],
        };

        let export = export_csv(&snap).unwrap();
        assert_eq!(export.model_id, "m1");
        assert!(export.elements_csv.starts_with("id,type_name,name,valid_from,valid_to,attributes_json,tags_json\n"));

        let graph = parse_csv(&export.elements_csv, &export.relationships_csv).unwrap();
        assert_eq!(graph.format, InterchangeFormat::Csv);
        assert_eq!(graph.model_id, None);
        assert_eq!(graph.elements[0].name, "Sales, \"EMEA\"");
        assert_eq!(graph.elements[0].attributes["owner"]["size"], serde_json::json!(4));
        assert_eq!(graph.elements[1].valid_from, None);
        assert_eq!(graph.relationships[0].source_element_id, "a");
    }

    #[test]
    fn empty_model_exports_header_only() {
        let snap = ModelSnapshot {
            model: model("m1"),
            elements: vec![],
            relationships: vec![],
        };
        let export = export_csv(&snap).unwrap();
        assert_eq!(export.relationships_csv.lines().count(), 1);
        let graph = parse_csv(&export.elements_csv, "").unwrap();
        assert!(graph.elements.is_empty());
        assert!(graph.relationships.is_empty());
    }

    #[test]
    fn csv_rows_need_ids_and_endpoints() {
        let err = parse_csv("id,type_name,name\n,Node,Host\n", "").unwrap_err();
        assert!(matches!(err, ModelError::Interchange(ref msg) if msg == "elements row 1: 'id' is required"));

        let rels = "id,type_name,source_element_id,target_element_id\nr1,Flow,e1,\n";
        let err = parse_csv("", rels).unwrap_err();
        assert!(err.to_string().contains("'target_element_id' is required"));

        let err = parse_csv("id,type_name,attributes_json\ne1,Node,{oops\n", "").unwrap_err();
        assert!(err.to_string().contains("elements row 1: invalid JSON payload"));
    }
}
