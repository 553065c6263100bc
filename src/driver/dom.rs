//! Page model shared by the recorder, the resolver and the browser hosts
//!
//! A `PageSnapshot` is a flat list of the elements a host found on the live
//! page, each carrying the descriptors the resolver strategies match against.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A point in viewport (CSS pixel) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Element bounding box, as reported by `getBoundingClientRect`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Get the center point of the bounds
    pub fn center(&self) -> Point {
        Point::new(self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    /// Inclusive containment check
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left
            && p.x <= self.left + self.width
            && p.y >= self.top
            && p.y <= self.top + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Size of the visible page area
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl Viewport {
    /// Clamp a point so it lies inside the viewport
    pub fn clamp(&self, p: Point) -> Point {
        let max_x = (self.width.saturating_sub(1)) as f64;
        let max_y = (self.height.saturating_sub(1)) as f64;
        Point::new(p.x.clamp(0.0, max_x), p.y.clamp(0.0, max_y))
    }
}

/// One element of the live page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageElement {
    /// Host-assigned handle, stable for the lifetime of the DOM node
    pub node_id: u32,
    pub tag: String,
    /// Explicit ARIA role or the implicit role of the tag
    pub role: Option<String>,
    pub text: String,
    pub aria_label: Option<String>,
    pub placeholder: Option<String>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub input_type: Option<String>,
    pub autocomplete: Option<String>,
    /// Text of the associated `<label>`, if any
    pub label: Option<String>,
    pub form_index: Option<usize>,
    /// Index among the interactive elements of the enclosing form (or the
    /// document, for elements outside any form)
    pub element_index: Option<usize>,
    pub nearby_text: Vec<String>,
    pub parent_text: Option<String>,
    pub bounds: Bounds,
    pub interactive: bool,
    pub visible: bool,
}

impl PageElement {
    /// Text a user would read on or next to the element
    pub fn visible_text(&self) -> &str {
        if !self.text.trim().is_empty() {
            &self.text
        } else {
            self.label.as_deref().unwrap_or("")
        }
    }

    /// Whether text can be typed into this element
    pub fn accepts_text(&self) -> bool {
        match self.tag.as_str() {
            "textarea" => true,
            "input" => !matches!(
                self.input_type.as_deref(),
                Some("button" | "submit" | "reset" | "checkbox" | "radio" | "image" | "file")
            ),
            _ => self
                .role
                .as_deref()
                .map(|r| r.eq_ignore_ascii_case("textbox"))
                .unwrap_or(false),
        }
    }

    /// Whether the element offers a list of options
    pub fn is_select(&self) -> bool {
        self.tag == "select"
            || self
                .role
                .as_deref()
                .map(|r| r.eq_ignore_ascii_case("combobox") || r.eq_ignore_ascii_case("listbox"))
                .unwrap_or(false)
    }
}

/// Everything the resolver needs to know about the live page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSnapshot {
    pub url: String,
    pub viewport: Viewport,
    pub elements: Vec<PageElement>,
}

impl PageSnapshot {
    /// Find the most specific visible element containing the point
    pub fn element_at(&self, p: Point) -> Option<&PageElement> {
        let mut best: Option<&PageElement> = None;
        let mut best_area = f64::MAX;

        for el in self.elements.iter().filter(|e| e.visible) {
            if el.bounds.contains(p) {
                let area = el.bounds.area();
                // Interactive elements win ties against decorative wrappers
                let better = area < best_area
                    || (area == best_area && el.interactive && !best.map_or(false, |b| b.interactive));
                if better {
                    best_area = area;
                    best = Some(el);
                }
            }
        }

        best
    }

    pub fn by_node(&self, node_id: u32) -> Option<&PageElement> {
        self.elements.iter().find(|e| e.node_id == node_id)
    }
}

/// Normalize text: replace NBSP with space, collapse runs of whitespace, trim
pub fn normalize_text(s: &str) -> String {
    s.replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Crop a PNG screenshot to the given bounds, clamped to the image
pub fn crop_png(bytes: &[u8], bounds: Bounds) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("Failed to decode screenshot")?;
    let (w, h) = (img.width(), img.height());

    let x = (bounds.left.max(0.0) as u32).min(w.saturating_sub(1));
    let y = (bounds.top.max(0.0) as u32).min(h.saturating_sub(1));
    let cw = (bounds.width.max(1.0) as u32).min(w - x);
    let ch = (bounds.height.max(1.0) as u32).min(h - y);

    let cropped = img.crop_imm(x, y, cw, ch);

    let mut buf = std::io::Cursor::new(Vec::new());
    cropped.write_to(&mut buf, image::ImageFormat::Png)?;
    Ok(buf.into_inner())
}
