//! The individual element-identification strategies
//!
//! Each strategy is a function of the step, the page snapshot and (for the
//! visual strategy) the vision capability. They never act on the page.

use crate::driver::dom::normalize_text;
use crate::driver::{PageElement, PageSnapshot, Point};
use crate::recipe::{Step, StepType};

use super::similarity::context_score;

/// Whether the element can take the step's action
pub(crate) fn compatible(step: &Step, el: &PageElement) -> bool {
    match step.step_type {
        StepType::Click => true,
        StepType::Input => el.accepts_text(),
        StepType::Select => el.is_select(),
    }
}

fn role_matches(step: &Step, el: &PageElement) -> bool {
    match step.identification.role.as_deref() {
        Some(wanted) if !wanted.trim().is_empty() => el
            .role
            .as_deref()
            .map(|r| r.eq_ignore_ascii_case(wanted.trim()))
            .unwrap_or(false),
        _ => true,
    }
}

/// Distance from the element center to where the target was recorded
fn distance(step: &Step, el: &PageElement) -> f64 {
    let c = el.bounds.center();
    let dx = c.x - step.coordinates.element_x;
    let dy = c.y - step.coordinates.element_y;
    (dx * dx + dy * dy).sqrt()
}

/// Pick one element among equally good text matches: interactive first, then
/// the one nearest the recorded position
fn best<'a>(step: &Step, matches: Vec<&'a PageElement>) -> Option<&'a PageElement> {
    matches.into_iter().min_by(|a, b| {
        b.interactive
            .cmp(&a.interactive)
            .then(distance(step, a).total_cmp(&distance(step, b)))
    })
}

type Field = fn(&PageElement) -> Option<&str>;

fn visible_text(e: &PageElement) -> Option<&str> {
    Some(e.visible_text())
}

fn aria_label(e: &PageElement) -> Option<&str> {
    e.aria_label.as_deref()
}

fn placeholder(e: &PageElement) -> Option<&str> {
    e.placeholder.as_deref()
}

fn title(e: &PageElement) -> Option<&str> {
    e.title.as_deref()
}

/// Strategy 1: exact, then case-insensitive, match of the recorded text,
/// falling back to aria-label, placeholder and title; filtered by role
pub fn text_role(step: &Step, page: &PageSnapshot) -> Option<PageElement> {
    let id = &step.identification;
    let fields: [(Option<&String>, Field); 4] = [
        (id.text.as_ref(), visible_text),
        (id.aria_label.as_ref(), aria_label),
        (id.placeholder.as_ref(), placeholder),
        (id.title.as_ref(), title),
    ];

    let candidates: Vec<&PageElement> = page
        .elements
        .iter()
        .filter(|e| e.visible && role_matches(step, e) && compatible(step, e))
        .collect();

    for (wanted, field) in fields {
        let wanted = match wanted.map(|w| normalize_text(w)) {
            Some(w) if !w.is_empty() => w,
            _ => continue,
        };

        let exact: Vec<&PageElement> = candidates
            .iter()
            .copied()
            .filter(|e| field(e).map(normalize_text).as_deref() == Some(wanted.as_str()))
            .collect();
        if let Some(el) = best(step, exact) {
            return Some(el.clone());
        }

        let wanted_lower = wanted.to_lowercase();
        let folded: Vec<&PageElement> = candidates
            .iter()
            .copied()
            .filter(|e| {
                field(e)
                    .map(|v| normalize_text(v).to_lowercase() == wanted_lower)
                    .unwrap_or(false)
            })
            .collect();
        if let Some(el) = best(step, folded) {
            return Some(el.clone());
        }
    }

    None
}

/// Strategy 2: same form and position among interactive elements, confirmed
/// by the similarity of the surrounding text. Returns the candidate with its
/// score; the caller applies the threshold.
pub fn structural(step: &Step, page: &PageSnapshot) -> Option<(PageElement, f64)> {
    let ctx = &step.context;
    let index = ctx.element_index?;

    let el = page.elements.iter().find(|e| {
        e.interactive && e.visible && e.form_index == ctx.form_index && e.element_index == Some(index)
    })?;

    if !compatible(step, el) || !role_matches(step, el) {
        return None;
    }

    let score = context_score(
        &ctx.nearby_text,
        ctx.parent_text.as_deref(),
        &el.nearby_text,
        el.parent_text.as_deref(),
    );
    Some((el.clone(), score))
}

/// Element under a point the vision capability returned, clamped to the viewport
pub fn at_vision_point(page: &PageSnapshot, point: Point) -> Option<PageElement> {
    let point = page.viewport.clamp(point);
    page.element_at(point).cloned()
}

/// Strategy 4: element at the recorded element coordinates
pub fn coordinate(step: &Step, page: &PageSnapshot) -> Option<PageElement> {
    let point = Point::new(step.coordinates.element_x, step.coordinates.element_y);
    page.element_at(point).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Bounds;
    use crate::testing::{element, step};

    fn page(elements: Vec<PageElement>) -> PageSnapshot {
        PageSnapshot {
            url: "https://bank.example/login".into(),
            elements,
            ..Default::default()
        }
    }

    #[test]
    fn test_text_exact_before_case_insensitive() {
        let mut upper = element(1, "button", "LOGIN");
        upper.bounds = Bounds::new(0.0, 0.0, 10.0, 10.0);
        let exact = element(2, "button", "Login");
        let p = page(vec![upper, exact]);

        let s = step(StepType::Click, 1, "Login");
        assert_eq!(text_role(&s, &p).unwrap().node_id, 2);

        let s = step(StepType::Click, 1, "login");
        // No exact match; the nearest case-insensitive one wins
        assert!(text_role(&s, &p).is_some());
    }

    #[test]
    fn test_text_prefers_interactive_over_leaf_text() {
        let mut label = element(1, "span", "Login");
        label.interactive = false;
        let button = element(2, "button", "Login");
        let p = page(vec![label, button]);
        let s = step(StepType::Click, 1, "Login");
        assert_eq!(text_role(&s, &p).unwrap().node_id, 2);
    }

    #[test]
    fn test_text_filtered_by_role() {
        let mut link = element(1, "a", "Statements");
        link.role = Some("link".into());
        let mut tab = element(2, "div", "Statements");
        tab.role = Some("tab".into());
        let p = page(vec![link, tab]);

        let mut s = step(StepType::Click, 1, "Statements");
        s.identification.role = Some("tab".into());
        assert_eq!(text_role(&s, &p).unwrap().node_id, 2);

        s.identification.role = Some("button".into());
        assert!(text_role(&s, &p).is_none());
    }

    #[test]
    fn test_text_falls_back_to_placeholder() {
        let mut input = element(7, "input", "");
        input.input_type = Some("password".into());
        input.placeholder = Some("Password".into());
        let p = page(vec![element(1, "button", "Login"), input]);

        let mut s = step(StepType::Input, 1, "");
        s.identification.text = None;
        s.identification.placeholder = Some("password".into());
        assert_eq!(text_role(&s, &p).unwrap().node_id, 7);
    }

    #[test]
    fn test_input_step_never_matches_a_button() {
        let p = page(vec![element(1, "button", "Username")]);
        let s = step(StepType::Input, 1, "Username");
        assert!(text_role(&s, &p).is_none());
    }

    #[test]
    fn test_structural_scores_context() {
        let mut field = element(3, "input", "");
        field.form_index = Some(0);
        field.element_index = Some(1);
        field.nearby_text = vec!["Customer number".into()];
        field.parent_text = Some("Customer number Sign in".into());
        let p = page(vec![field]);

        let mut s = step(StepType::Input, 1, "Customer ID");
        s.context.form_index = Some(0);
        s.context.element_index = Some(1);
        s.context.nearby_text = vec!["Customer number".into()];
        s.context.parent_text = Some("Customer number Sign in".into());

        let (el, score) = structural(&s, &p).unwrap();
        assert_eq!(el.node_id, 3);
        assert!((score - 1.0).abs() < 1e-9);

        s.context.element_index = Some(2);
        assert!(structural(&s, &p).is_none());
    }

    #[test]
    fn test_vision_point_is_clamped() {
        let mut corner = element(9, "button", "Menu");
        corner.bounds = Bounds::new(1270.0, 0.0, 10.0, 10.0);
        let p = page(vec![corner]);
        let el = at_vision_point(&p, Point::new(5000.0, -20.0)).unwrap();
        assert_eq!(el.node_id, 9);
    }

    #[test]
    fn test_coordinate_strategy() {
        let p = page(vec![element(4, "button", "Go")]);
        let mut s = step(StepType::Click, 1, "Go");
        assert_eq!(coordinate(&s, &p).unwrap().node_id, 4);
        s.coordinates.element_x = 2000.0;
        assert!(coordinate(&s, &p).is_none());
    }
}
