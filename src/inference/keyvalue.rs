//! Hierarchical key-value extraction.
//!
//! Each populated row of a region becomes a node. Its place in the tree comes from
//! comparing its cues (indentation, formatting, column offset) with the open ancestors,
//! in the order set by a [`CuePolicy`].

use crate::helpers::string::collapse_whitespace;
use crate::helpers::string::leading_indent;
use crate::inference::Region;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::sheet::RawSheet;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::LazyLock;

/// Longest key accepted on the left of an inline `key: value`.
const MAX_INLINE_KEY_CHARS: usize = 50;

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-•*·▪◦–]|\(?\d+(?:\.\d+)*[.)]|\(?[a-zA-Z][.)]|\(?[ivxIVX]+[.)])\s+").expect("Hardcode regex pattern")
});

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    /// Cell indent level plus leading whitespace
    Indentation,
    /// Bold text or a heading without a value
    Formatting,
    /// Key column relative to the region
    ColumnOffset,
}

/// Order in which cues decide between child, sibling and shallower placement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CuePolicy {
    pub order: Vec<Cue>,
}

impl Default for CuePolicy {
    fn default() -> Self {
        CuePolicy {
            order: vec![Cue::Indentation, Cue::Formatting, Cue::ColumnOffset],
        }
    }
}

/// A key with an optional value and ordered children. `depth` is 0 for roots and one more
/// than the parent's for every child.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyValueNode {
    pub key: String,
    pub value: Option<Cell>,
    pub children: Vec<KeyValueNode>,
    pub depth: usize,
}

impl KeyValueNode {
    /// Number of nodes in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(KeyValueNode::count).sum::<usize>()
    }

    /// Every node of the subtree, parents before children.
    pub fn walk(&self) -> Vec<&KeyValueNode> {
        let mut nodes = vec![self];
        for child in &self.children {
            nodes.extend(child.walk());
        }
        nodes
    }
}

/// Cue values of one row, compared against the open ancestors.
#[derive(Copy, Clone, Debug)]
struct Cues {
    indentation: usize,
    /// 1 for bold or value-less headings
    emphasis: usize,
    offset: usize,
}

/// Where a row goes relative to an open ancestor.
enum Placement {
    Child,
    Sibling,
    Shallower,
}

impl Cues {
    fn place(&self, ancestor: &Cues, policy: &CuePolicy) -> Placement {
        for cue in &policy.order {
            let ordering = match cue {
                Cue::Indentation => self.indentation.cmp(&ancestor.indentation),
                // A stronger ancestor heading makes plain rows its children
                Cue::Formatting => ancestor.emphasis.cmp(&self.emphasis),
                Cue::ColumnOffset => self.offset.cmp(&ancestor.offset),
            };
            match ordering {
                Ordering::Greater => return Placement::Child,
                Ordering::Less => return Placement::Shallower,
                Ordering::Equal => (),
            }
        }
        Placement::Sibling
    }
}

struct Pending {
    key: String,
    value: Option<Cell>,
    cues: Cues,
    children: Vec<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct KeyValueExtractor {
    policy: CuePolicy,
}

impl KeyValueExtractor {
    pub fn new(policy: CuePolicy) -> Self {
        KeyValueExtractor { policy }
    }

    pub fn policy(&self) -> &CuePolicy {
        &self.policy
    }

    /// Builds the key-value forest of a region.
    pub fn extract(&self, sheet: &RawSheet, region: &Region) -> Vec<KeyValueNode> {
        let range = region.range;
        let mut nodes: Vec<Pending> = Vec::new();
        let mut roots: Vec<usize> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();

        for row in range.top..=range.bottom {
            let cells = sheet.row_span(row, range.left, range.right);
            let Some(first) = cells.first() else {
                continue;
            };
            let Some((key, value)) = split_row(first, cells.get(1)) else {
                continue;
            };
            let cues = Cues {
                indentation: first.style.indent as usize + leading_indent(&first.value),
                emphasis: usize::from(first.style.bold || value.is_none()),
                offset: first.col - range.left,
            };

            // Close ancestors until the row fits under the top of the stack
            let parent = loop {
                let Some(top) = stack.last().copied() else {
                    break None;
                };
                match cues.place(&nodes[top].cues, &self.policy) {
                    Placement::Child => break Some(top),
                    Placement::Sibling => {
                        stack.pop();
                        break stack.last().copied();
                    }
                    Placement::Shallower => {
                        stack.pop();
                    }
                }
            };

            let index = nodes.len();
            nodes.push(Pending {
                key,
                value,
                cues,
                children: Vec::new(),
            });
            match parent {
                Some(parent) => nodes[parent].children.push(index),
                None => roots.push(index),
            }
            stack.push(index);
        }

        let mut slots: Vec<Option<Pending>> = nodes.into_iter().map(Some).collect();
        roots.into_iter().filter_map(|root| build(&mut slots, root, 0)).collect()
    }
}

/// Assembles a subtree; depth comes from the position in the tree.
fn build(slots: &mut [Option<Pending>], index: usize, depth: usize) -> Option<KeyValueNode> {
    let pending = slots.get_mut(index)?.take()?;
    let children = pending
        .children
        .iter()
        .filter_map(|child| build(slots, *child, depth + 1))
        .collect();
    Some(KeyValueNode {
        key: pending.key,
        value: pending.value,
        children,
        depth,
    })
}

/// Key and value of a row: the next cell to the right, or the right side of an inline
/// `key: value` / `key = value`. List numbering and bullets are stripped from the key.
fn split_row(first: &Cell, next: Option<&Cell>) -> Option<(String, Option<Cell>)> {
    let text = collapse_whitespace(&first.to_string());
    let text = LIST_MARKER.replace(&text, "").trim().to_owned();
    if text.is_empty() {
        return None;
    }
    if let Some(next) = next {
        let key = text.trim_end_matches([':', '=']).trim_end().to_owned();
        return Some((if key.is_empty() { text } else { key }, Some(next.clone())));
    }
    if let Some(position) = text.find([':', '=']) {
        let (key, rest) = text.split_at(position);
        let key = key.trim();
        let value = rest[1..].trim();
        if !key.is_empty() && key.chars().count() < MAX_INLINE_KEY_CHARS {
            let value = (!value.is_empty()).then(|| Cell::text(first.row, first.col, value));
            return Some((key.to_owned(), value));
        }
    }
    Some((text, None))
}
