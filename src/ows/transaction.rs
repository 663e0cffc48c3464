// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! WFS transaction decoding.
//!
//! Only the structure needed for authorization is extracted: which layers
//! are inserted into, updated and deleted from. Feature content is skipped.

use crate::ows::permissions::EditAction;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOp {
    /// `objects` features of one layer inside one `Insert` element.
    Insert { layer_name: String, objects: usize },
    Update { layer_name: String },
    Delete { layer_name: String },
}

impl TransactionOp {
    pub fn layer_name(&self) -> &str {
        match self {
            TransactionOp::Insert { layer_name, .. }
            | TransactionOp::Update { layer_name }
            | TransactionOp::Delete { layer_name } => layer_name,
        }
    }

    pub fn action(&self) -> EditAction {
        match self {
            TransactionOp::Insert { .. } => EditAction::Insert,
            TransactionOp::Update { .. } => EditAction::Update,
            TransactionOp::Delete { .. } => EditAction::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed transaction document: {0}")]
    Malformed(String),
    #[error("{0} operation without typeName")]
    MissingTypeName(&'static str),
    #[error("unsupported transaction operation: {0}")]
    Unsupported(String),
    #[error("missing {0} parameter")]
    MissingParameter(&'static str),
}

/// Operation element currently open below the root.
enum Open {
    Insert(Vec<(String, usize)>),
    Other,
}

/// Decode a transaction document.
///
/// A well-formed document whose root is not `Transaction` yields no
/// operations. The body is only borrowed.
pub fn parse(body: &[u8]) -> Result<Vec<TransactionOp>, ParseError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut ops = Vec::new();
    let mut depth = 0usize;
    let mut is_transaction = false;
    let mut seen_root = false;
    let mut open: Option<Open> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseError::Malformed(format!("at byte {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(e) => {
                if depth == 0 {
                    if seen_root {
                        return Err(ParseError::Malformed("multiple root elements".into()));
                    }
                    seen_root = true;
                    is_transaction = e.local_name().as_ref() == b"Transaction";
                } else if is_transaction {
                    visit(&e, depth, &mut open, &mut ops)?;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 0 {
                    if seen_root {
                        return Err(ParseError::Malformed("multiple root elements".into()));
                    }
                    seen_root = true;
                } else if is_transaction {
                    visit(&e, depth, &mut open, &mut ops)?;
                    if depth == 1 {
                        close(&mut open, &mut ops);
                    }
                }
            }
            Event::End(_) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ParseError::Malformed("unexpected closing tag".into()))?;
                if is_transaction && depth == 1 {
                    close(&mut open, &mut ops);
                }
            }
            Event::Text(t) if depth == 0 => {
                if !t.iter().all(u8::is_ascii_whitespace) {
                    return Err(ParseError::Malformed("text outside the root element".into()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(ParseError::Malformed("no root element".into()));
    }
    if depth != 0 {
        return Err(ParseError::Malformed("unclosed element".into()));
    }
    Ok(ops)
}

fn visit(
    e: &BytesStart<'_>,
    depth: usize,
    open: &mut Option<Open>,
    ops: &mut Vec<TransactionOp>,
) -> Result<(), ParseError> {
    match depth {
        1 => {
            let local = e.local_name();
            *open = Some(match local.as_ref() {
                b"Insert" => Open::Insert(Vec::new()),
                b"Update" | b"Replace" => {
                    let layer_name = type_name(e, "Update")?;
                    ops.push(TransactionOp::Update { layer_name });
                    Open::Other
                }
                b"Delete" => {
                    let layer_name = type_name(e, "Delete")?;
                    ops.push(TransactionOp::Delete { layer_name });
                    Open::Other
                }
                b"Native" => return Err(ParseError::Unsupported("Native".into())),
                _ => Open::Other,
            });
        }
        2 => {
            if let Some(Open::Insert(groups)) = open {
                let layer = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match groups.iter_mut().find(|(name, _)| *name == layer) {
                    Some((_, count)) => *count += 1,
                    None => groups.push((layer, 1)),
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn close(open: &mut Option<Open>, ops: &mut Vec<TransactionOp>) {
    if let Some(Open::Insert(groups)) = open.take() {
        ops.extend(
            groups
                .into_iter()
                .map(|(layer_name, objects)| TransactionOp::Insert { layer_name, objects }),
        );
    }
}

fn type_name(e: &BytesStart<'_>, op: &'static str) -> Result<String, ParseError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ParseError::Malformed(err.to_string()))?;
        if attr.key.local_name().as_ref() == b"typeName" {
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::Malformed(err.to_string()))?;
            let value = value.trim();
            if value.is_empty() {
                break;
            }
            return Ok(value.to_string());
        }
    }
    Err(ParseError::MissingTypeName(op))
}

/// Operations of a key-value-pair encoded transaction
/// (`REQUEST=Transaction&OPERATION=Delete&TYPENAME=a,b`).
pub fn from_kvp(
    operation: Option<&str>,
    type_names: Option<&str>,
) -> Result<Vec<TransactionOp>, ParseError> {
    let operation = operation
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingParameter("OPERATION"))?;
    let layers: Vec<String> = type_names
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if layers.is_empty() {
        return Err(ParseError::MissingParameter("TYPENAME"));
    }

    let make: fn(String) -> TransactionOp = match operation.to_ascii_lowercase().as_str() {
        "insert" => |layer_name| TransactionOp::Insert { layer_name, objects: 1 },
        "update" => |layer_name| TransactionOp::Update { layer_name },
        "delete" => |layer_name| TransactionOp::Delete { layer_name },
        _ => return Err(ParseError::Unsupported(operation.to_string())),
    };
    Ok(layers.into_iter().map(make).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSACTION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:Transaction service="WFS" version="1.0.0"
    xmlns:wfs="http://www.opengis.net/wfs"
    xmlns:ogc="http://www.opengis.net/ogc"
    xmlns:public="http://qgis.org/gml">
  <wfs:Insert>
    <public:parcels><public:geometry/><public:owner>A &amp; B</public:owner></public:parcels>
    <public:parcels><public:owner>C</public:owner></public:parcels>
    <public:roads><public:kind>primary</public:kind></public:roads>
  </wfs:Insert>
  <wfs:Update typeName="public:roads">
    <wfs:Property><wfs:Name>kind</wfs:Name><wfs:Value>minor</wfs:Value></wfs:Property>
    <ogc:Filter><ogc:FeatureId fid="roads.4"/></ogc:Filter>
  </wfs:Update>
  <wfs:Delete typeName="rivers">
    <ogc:Filter><ogc:FeatureId fid="rivers.1"/></ogc:Filter>
  </wfs:Delete>
</wfs:Transaction>"#;

    #[test]
    fn parses_insert_update_delete() {
        let ops = parse(TRANSACTION.as_bytes()).unwrap();
        assert_eq!(
            ops,
            vec![
                TransactionOp::Insert { layer_name: "parcels".into(), objects: 2 },
                TransactionOp::Insert { layer_name: "roads".into(), objects: 1 },
                TransactionOp::Update { layer_name: "public:roads".into() },
                TransactionOp::Delete { layer_name: "rivers".into() },
            ]
        );
        assert_eq!(ops[2].action(), EditAction::Update);
    }

    #[test]
    fn self_closing_delete_and_lock_id() {
        let body = br#"<Transaction><LockId>abc</LockId><Delete typeName="a:b"/></Transaction>"#;
        assert_eq!(
            parse(body).unwrap(),
            vec![TransactionOp::Delete { layer_name: "a:b".into() }]
        );
    }

    #[test]
    fn non_transaction_root_yields_nothing() {
        let body = br#"<wfs:GetFeature xmlns:wfs="http://www.opengis.net/wfs"><wfs:Query typeName="parcels"/></wfs:GetFeature>"#;
        assert!(parse(body).unwrap().is_empty());
        assert!(parse(b"<Transaction/>").unwrap().is_empty());
    }

    #[test]
    fn malformed_documents_are_rejected() {
        let bodies: [&[u8]; 5] = [
            b"",
            b"not xml at all",
            b"<Transaction><Insert></Transaction>",
            b"<Transaction><Insert>",
            b"<a/><b/>",
        ];
        for body in bodies {
            assert!(
                matches!(parse(body), Err(ParseError::Malformed(_))),
                "{:?}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn update_without_type_name_and_native_are_errors() {
        assert_eq!(
            parse(b"<Transaction><Update><Property/></Update></Transaction>"),
            Err(ParseError::MissingTypeName("Update"))
        );
        assert!(matches!(
            parse(b"<Transaction><Native vendorId=\"x\"/></Transaction>"),
            Err(ParseError::Unsupported(_))
        ));
    }

    #[test]
    fn kvp_operations() {
        assert_eq!(
            from_kvp(Some("Delete"), Some("parcels, roads")).unwrap(),
            vec![
                TransactionOp::Delete { layer_name: "parcels".into() },
                TransactionOp::Delete { layer_name: "roads".into() },
            ]
        );
        assert_eq!(
            from_kvp(None, Some("parcels")),
            Err(ParseError::MissingParameter("OPERATION"))
        );
        assert_eq!(
            from_kvp(Some("delete"), Some(" ")),
            Err(ParseError::MissingParameter("TYPENAME"))
        );
        assert!(matches!(
            from_kvp(Some("LockFeature"), Some("parcels")),
            Err(ParseError::Unsupported(_))
        ));
    }
}
