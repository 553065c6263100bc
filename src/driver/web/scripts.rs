//! Scripts injected into the page by the Playwright host
//!
//! All scripts share the `describe` helper so recorded targets and playback
//! snapshots carry identical descriptors.

/// Shared helpers, prefixed to every script below
const HELPERS: &str = r#"
const INTERACTIVE = 'a,button,input,select,textarea,[role=button],[role=link],[role=checkbox],[role=tab],[role=menuitem],[role=option],[onclick],[contenteditable=true]';
const clean = (s) => (s || '').replace(/\s+/g, ' ').trim();
const implicitRole = (el) => {
  const t = el.tagName.toLowerCase();
  if (t === 'a' && el.href) return 'link';
  if (t === 'button') return 'button';
  if (t === 'select') return 'combobox';
  if (t === 'textarea') return 'textbox';
  if (t === 'input') {
    const ty = (el.type || 'text').toLowerCase();
    if (['button', 'submit', 'reset', 'image'].includes(ty)) return 'button';
    if (ty === 'checkbox') return 'checkbox';
    if (ty === 'radio') return 'radio';
    return 'textbox';
  }
  return null;
};
const ownText = (el) => {
  const t = el.tagName.toLowerCase();
  if (t === 'input') {
    const ty = (el.type || '').toLowerCase();
    return ['button', 'submit', 'reset'].includes(ty) ? clean(el.value) : '';
  }
  if (t === 'textarea' || t === 'select') return '';
  return clean(el.innerText || el.alt || '').slice(0, 200);
};
const labelOf = (el) => (el.labels && el.labels.length) ? clean(el.labels[0].innerText) : null;
const nearby = (el) => {
  const out = [];
  let p = el.parentElement;
  for (let depth = 0; p && depth < 3 && out.length < 5; depth++, p = p.parentElement) {
    for (const c of p.children) {
      if (c === el || c.contains(el)) continue;
      const t = clean(c.innerText);
      if (t && t.length < 80 && !out.includes(t)) out.push(t);
      if (out.length >= 5) break;
    }
  }
  return out;
};
const formIndex = (el) => {
  const f = el.closest('form');
  return f ? Array.from(document.forms).indexOf(f) : null;
};
const elementIndex = (el) => {
  const f = el.closest('form');
  const scope = Array.from((f || document).querySelectorAll(INTERACTIVE))
    .filter((e) => f || !e.closest('form'));
  const i = scope.indexOf(el);
  return i < 0 ? null : i;
};
const nodeId = (el) => {
  if (!el.__prNode) {
    window.__prNextNode = (window.__prNextNode || 0) + 1;
    el.__prNode = window.__prNextNode;
    el.setAttribute('data-pr-node', String(el.__prNode));
  }
  return el.__prNode;
};
const describe = (el) => {
  const r = el.getBoundingClientRect();
  const style = getComputedStyle(el);
  const attr = (n) => el.getAttribute(n) || null;
  return {
    nodeId: nodeId(el),
    tag: el.tagName.toLowerCase(),
    role: attr('role') || implicitRole(el),
    text: ownText(el),
    ariaLabel: attr('aria-label'),
    placeholder: attr('placeholder'),
    title: attr('title'),
    name: attr('name'),
    inputType: el.type ? String(el.type).toLowerCase() : null,
    autocomplete: attr('autocomplete'),
    label: labelOf(el),
    formIndex: formIndex(el),
    elementIndex: el.matches(INTERACTIVE) ? elementIndex(el) : null,
    nearbyText: nearby(el),
    parentText: el.parentElement ? clean(el.parentElement.innerText).slice(0, 200) : null,
    bounds: { left: r.left, top: r.top, width: r.width, height: r.height },
    interactive: el.matches(INTERACTIVE),
    visible: r.width > 0 && r.height > 0 && style.visibility !== 'hidden' && style.display !== 'none',
  };
};
const byNode = (id) => document.querySelector('[data-pr-node="' + id + '"]');
"#;

const SNAPSHOT_BODY: &str = r#"
  const out = [];
  for (const el of document.querySelectorAll('body *')) {
    if (out.length >= 3000) break;
    const leafText = el.children.length === 0 && clean(el.innerText).length > 0;
    if (el.matches(INTERACTIVE) || leafText) out.push(describe(el));
  }
  return {
    url: location.href,
    viewport: { width: window.innerWidth, height: window.innerHeight },
    elements: out,
  };
"#;

const CAPTURE_BODY: &str = r#"
  if (window.__prCapture) return true;
  window.__prCapture = true;
  const push = (ev) => {
    const q = JSON.parse(sessionStorage.getItem('__prQueue') || '[]');
    q.push(ev);
    sessionStorage.setItem('__prQueue', JSON.stringify(q));
  };
  const isField = (el) => el.tagName === 'TEXTAREA' || el.tagName === 'SELECT' ||
    (el.tagName === 'INPUT' && !['button', 'submit', 'reset', 'image', 'checkbox', 'radio'].includes((el.type || '').toLowerCase()));
  document.addEventListener('click', (e) => {
    const el = e.target.closest(INTERACTIVE) || e.target;
    if (isField(el)) return;
    push({ kind: 'click', timestamp: Date.now(), target: describe(el), pointer: { x: e.clientX, y: e.clientY }, value: null, pageUrl: location.href });
  }, true);
  document.addEventListener('change', (e) => {
    const el = e.target;
    if (!isField(el)) return;
    const r = el.getBoundingClientRect();
    const center = { x: r.left + r.width / 2, y: r.top + r.height / 2 };
    const secret = (el.type || '').toLowerCase() === 'password';
    const kind = el.tagName === 'SELECT' ? 'select' : 'input';
    push({ kind, timestamp: Date.now(), target: describe(el), pointer: center, value: secret ? null : el.value, pageUrl: location.href });
  }, true);
  return true;
"#;

/// Drains the interaction queue kept in sessionStorage (survives same-origin navigation)
pub const DRAIN_SCRIPT: &str = r#"() => {
  const q = sessionStorage.getItem('__prQueue');
  sessionStorage.removeItem('__prQueue');
  return q ? JSON.parse(q) : [];
}"#;

pub const STOP_CAPTURE_SCRIPT: &str = r#"() => {
  sessionStorage.removeItem('__prQueue');
  return true;
}"#;

const SET_VALUE_BODY: &str = r#"
  const el = byNode(arg.node);
  if (!el) return false;
  el.focus();
  const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
  const setter = Object.getOwnPropertyDescriptor(proto, 'value');
  if (setter && setter.set && (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA')) {
    setter.set.call(el, arg.value);
  } else {
    el.textContent = arg.value;
  }
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
"#;

const SELECT_OPTION_BODY: &str = r#"
  const el = byNode(arg.node);
  if (!el || el.tagName !== 'SELECT') return false;
  const wanted = String(arg.value);
  const opt = Array.from(el.options).find((o) => o.value === wanted)
    || Array.from(el.options).find((o) => clean(o.text).toLowerCase() === wanted.toLowerCase());
  if (!opt) return false;
  el.value = opt.value;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
"#;

/// Extracts every table on the page as header + rows of cell text
pub const EXTRACT_TABLES_SCRIPT: &str = r#"() => {
  const clean = (s) => (s || '').replace(/\s+/g, ' ').trim();
  return Array.from(document.querySelectorAll('table')).map((t) => {
    const rows = Array.from(t.rows).map((r) => Array.from(r.cells).map((c) => clean(c.innerText)));
    const hasHead = t.tHead && t.tHead.rows.length > 0;
    const headers = hasHead ? rows.shift() : [];
    return { headers, rows: rows.filter((r) => r.some((c) => c.length > 0)) };
  }).filter((t) => t.rows.length > 0);
}"#;

fn with_helpers(params: &str, body: &str) -> String {
    format!("({}) => {{\n{}\n{}\n}}", params, HELPERS, body)
}

pub fn snapshot_script() -> String {
    with_helpers("", SNAPSHOT_BODY)
}

pub fn capture_script() -> String {
    with_helpers("", CAPTURE_BODY)
}

pub fn set_value_script() -> String {
    with_helpers("arg", SET_VALUE_BODY)
}

pub fn select_option_script() -> String {
    with_helpers("arg", SELECT_OPTION_BODY)
}
