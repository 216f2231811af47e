// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The device-model path filter.
//!
//! Client queries carry a `path` parameter selecting a subset of data items.
//! This is the XPath subset the agent actually needs: `/` and `//` steps,
//! element names (`Devices`, `Device`, component types, `DataItem`, `*`),
//! `[@attr="value"]` predicates, and `|` unions. A selected component keeps
//! every data item beneath it; a selected data item keeps itself.

use std::collections::HashSet;

use thiserror::Error;

use super::component::Component;
use super::{DataItem, DeviceModel};

/// A path expression that could not be parsed.
#[derive(Debug, Error)]
#[error("invalid path expression: {0}")]
pub struct PathError(String);

#[derive(Debug, Clone, PartialEq)]
enum StepName {
    Any,
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    /// True for `//` (descendant), false for `/` (direct child).
    descendant: bool,
    name: StepName,
    predicates: Vec<(String, String)>,
}

/// A parsed path: one or more `|`-joined expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFilter {
    exprs: Vec<Vec<Step>>,
}

impl PathFilter {
    /// Parse a path expression.
    ///
    /// # Errors
    /// Returns a [`PathError`] when the expression is not in the supported
    /// subset.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let mut exprs = Vec::new();
        for part in split_unions(path) {
            let part = part.trim();
            if part.is_empty() {
                return Err(PathError("empty path expression".to_string()));
            }
            exprs.push(parse_expr(part)?);
        }
        if exprs.is_empty() {
            return Err(PathError("empty path".to_string()));
        }
        Ok(Self { exprs })
    }

    /// Resolve the filter against a device model into a set of data-item ids.
    #[must_use]
    pub fn resolve(&self, model: &DeviceModel) -> HashSet<String> {
        let mut ids = HashSet::new();
        for steps in &self.exprs {
            // The Devices document element sits above every device.
            let devices_node = Node {
                element: "Devices",
                id: "",
                name: None,
                attrs: NodeAttrs::None,
            };
            let mut active = vec![0usize];
            step_into(steps, &devices_node, &mut active, &mut |selected| {
                if selected.element == "Devices" {
                    for device in model.devices() {
                        ids.extend(device.data_items().map(|item| item.id().to_string()));
                    }
                }
            });
            for device in model.devices() {
                walk_device(steps, &active, device, &mut ids);
            }
        }
        ids
    }
}

enum NodeAttrs<'a> {
    None,
    Device(&'a super::Device),
    DataItem(&'a DataItem),
}

struct Node<'a> {
    element: &'a str,
    id: &'a str,
    name: Option<&'a str>,
    attrs: NodeAttrs<'a>,
}

impl Node<'_> {
    fn attribute(&self, attr: &str) -> Option<String> {
        match attr {
            "id" => Some(self.id.to_string()),
            "name" => self.name.map(ToString::to_string),
            _ => match &self.attrs {
                NodeAttrs::Device(device) => match attr {
                    "uuid" => Some(device.uuid()),
                    _ => None,
                },
                NodeAttrs::DataItem(item) => match attr {
                    "type" => Some(item.type_name().to_string()),
                    "subType" => item.sub_type().map(ToString::to_string),
                    "category" => Some(item.category().as_str().to_string()),
                    "source" => item.source().map(ToString::to_string),
                    _ => None,
                },
                NodeAttrs::None => None,
            },
        }
    }
}

impl Step {
    fn matches(&self, node: &Node<'_>) -> bool {
        let name_ok = match &self.name {
            StepName::Any => true,
            StepName::Named(name) => name == node.element,
        };
        name_ok
            && self
                .predicates
                .iter()
                .all(|(attr, value)| node.attribute(attr).as_deref() == Some(value))
    }
}

/// Advance the step NFA over one node. `active` holds the indices of steps
/// that may match this node; on return it holds the indices for the node's
/// children. Fully matched nodes are reported through `select`.
fn step_into(
    steps: &[Step],
    node: &Node<'_>,
    active: &mut Vec<usize>,
    select: &mut dyn FnMut(&Node<'_>),
) {
    let mut next = Vec::new();
    for &state in active.iter() {
        let step = &steps[state];
        if step.matches(node) {
            if state + 1 == steps.len() {
                select(node);
            } else {
                next.push(state + 1);
            }
        }
        // A descendant step keeps looking deeper in the tree.
        if step.descendant {
            next.push(state);
        }
    }
    next.sort_unstable();
    next.dedup();
    *active = next;
}

fn walk_device(
    steps: &[Step],
    parent_active: &[usize],
    device: &super::Device,
    ids: &mut HashSet<String>,
) {
    let root = device.root();
    let node = Node {
        element: "Device",
        id: device.id(),
        name: Some(device.name()),
        attrs: NodeAttrs::Device(device),
    };
    let mut active = parent_active.to_vec();
    let mut selected_subtree = false;
    step_into(steps, &node, &mut active, &mut |_| selected_subtree = true);
    if selected_subtree {
        ids.extend(device.data_items().map(|item| item.id().to_string()));
        return;
    }
    if active.is_empty() {
        return;
    }
    for item in &root.data_items {
        visit_data_item(steps, &active, item, ids);
    }
    for child in &root.children {
        walk_component(steps, &active, child, ids);
    }
}

fn walk_component(
    steps: &[Step],
    parent_active: &[usize],
    component: &Component,
    ids: &mut HashSet<String>,
) {
    let node = Node {
        element: &component.component_type,
        id: &component.id,
        name: component.name.as_deref(),
        attrs: NodeAttrs::None,
    };
    let mut active = parent_active.to_vec();
    let mut selected_subtree = false;
    step_into(steps, &node, &mut active, &mut |_| selected_subtree = true);
    if selected_subtree {
        ids.extend(
            component
                .all_data_items()
                .iter()
                .map(|item| item.id().to_string()),
        );
        return;
    }
    if active.is_empty() {
        return;
    }
    for item in &component.data_items {
        visit_data_item(steps, &active, item, ids);
    }
    for child in &component.children {
        walk_component(steps, &active, child, ids);
    }
}

fn visit_data_item(steps: &[Step], parent_active: &[usize], item: &DataItem, ids: &mut HashSet<String>) {
    let node = Node {
        element: "DataItem",
        id: item.id(),
        name: item.name(),
        attrs: NodeAttrs::DataItem(item),
    };
    let mut active = parent_active.to_vec();
    step_into(steps, &node, &mut active, &mut |_| {
        ids.insert(item.id().to_string());
    });
}

/// Split on `|` outside of predicate brackets and quotes.
fn split_unions(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '|') if depth == 0 => {
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&path[start..]);
    parts
}

fn parse_expr(expr: &str) -> Result<Vec<Step>, PathError> {
    let mut rest = expr;
    let mut steps = Vec::new();
    if !rest.starts_with('/') {
        return Err(PathError(format!("path must start with '/': {expr}")));
    }
    while !rest.is_empty() {
        let descendant = if let Some(r) = rest.strip_prefix("//") {
            rest = r;
            true
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
            false
        } else {
            return Err(PathError(format!("expected '/' in path: {expr}")));
        };

        let name_end = rest
            .find(|c| c == '/' || c == '[')
            .unwrap_or(rest.len());
        let raw_name = &rest[..name_end];
        if raw_name.is_empty() {
            return Err(PathError(format!("missing element name in path: {expr}")));
        }
        let name = if raw_name == "*" {
            StepName::Any
        } else if raw_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':') {
            // Strip any namespace prefix; the model is prefix-free.
            let local = raw_name.rsplit(':').next().unwrap_or(raw_name);
            StepName::Named(local.to_string())
        } else {
            return Err(PathError(format!("bad element name '{raw_name}'")));
        };
        rest = &rest[name_end..];

        let mut predicates = Vec::new();
        while let Some(r) = rest.strip_prefix('[') {
            let close = r
                .find(']')
                .ok_or_else(|| PathError(format!("unclosed predicate in path: {expr}")))?;
            predicates.push(parse_predicate(&r[..close])?);
            rest = &r[close + 1..];
        }

        steps.push(Step {
            descendant,
            name,
            predicates,
        });
    }
    Ok(steps)
}

fn parse_predicate(body: &str) -> Result<(String, String), PathError> {
    let body = body.trim();
    let body = body
        .strip_prefix('@')
        .ok_or_else(|| PathError(format!("unsupported predicate: [{body}]")))?;
    let (attr, value) = body
        .split_once('=')
        .ok_or_else(|| PathError(format!("unsupported predicate: [@{body}]")))?;
    let attr = attr.trim().to_string();
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .ok_or_else(|| PathError(format!("predicate value must be quoted: {value}")))?;
    Ok((attr, value.to_string()))
}
