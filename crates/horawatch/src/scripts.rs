//! Inline page scripts evaluated through the engine.
//!
//! Selector and phrase tables are injected as JSON literals so quoting stays
//! correct regardless of what the rules files contain. Every script swallows
//! its own DOM exceptions; a probe must degrade to an empty result, never
//! throw into the caller.

fn js_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn js_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Shared visibility predicate: laid out with non-zero size, not hidden via
/// display/visibility/opacity.
const VISIBLE_FN: &str = r#"
    const isVisible = (el) => {
        if (!el) return false;
        const style = window.getComputedStyle(el);
        if (!style) return false;
        if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') return false;
        return el.offsetWidth > 0 && el.offsetHeight > 0;
    };
"#;

/// Detect visible overlay-like elements. Returns `{found, matches: [selector]}`.
pub(crate) fn overlay_probe(overlay_selectors: &[String]) -> String {
    format!(
        r#"(() => {{
            const overlaySelectors = {selectors};
            {VISIBLE_FN}
            const matches = [];
            for (const sel of overlaySelectors) {{
                let nodes = [];
                try {{ nodes = Array.from(document.querySelectorAll(sel)); }} catch (_) {{ continue; }}
                if (nodes.some(isVisible)) matches.push(sel);
            }}
            return {{ found: matches.length > 0, matches: matches.slice(0, 8) }};
        }})()"#,
        selectors = js_array(overlay_selectors),
    )
}

/// Click a recognized close control inside the first visible overlay.
/// Returns `{clicked, control}`.
pub(crate) fn overlay_close_click(
    overlay_selectors: &[String],
    close_selectors: &[String],
    close_texts: &[String],
) -> String {
    format!(
        r#"(() => {{
            const overlaySelectors = {overlays};
            const closeSelectors = {closers};
            const closeTexts = {texts};
            {VISIBLE_FN}
            let overlay = null;
            for (const sel of overlaySelectors) {{
                let nodes = [];
                try {{ nodes = Array.from(document.querySelectorAll(sel)); }} catch (_) {{ continue; }}
                overlay = nodes.find(isVisible) || null;
                if (overlay) break;
            }}
            if (!overlay) return {{ clicked: false, control: null }};
            for (const sel of closeSelectors) {{
                let ctrl = null;
                try {{ ctrl = overlay.querySelector(sel); }} catch (_) {{ continue; }}
                if (ctrl) {{ ctrl.click(); return {{ clicked: true, control: sel }}; }}
            }}
            const candidates = Array.from(overlay.querySelectorAll('button, input[type="button"], input[type="submit"], a'));
            for (const ctrl of candidates) {{
                const text = (ctrl.textContent || ctrl.value || '').trim();
                if (closeTexts.some(t => text === t || text.toLowerCase() === t.toLowerCase())) {{
                    ctrl.click();
                    return {{ clicked: true, control: text }};
                }}
            }}
            return {{ clicked: false, control: null }};
        }})()"#,
        overlays = js_array(overlay_selectors),
        closers = js_array(close_selectors),
        texts = js_array(close_texts),
    )
}

/// Force-hide visible overlays and remove backdrop layers. Returns `{hidden, removed}`.
pub(crate) fn overlay_force_hide(
    overlay_selectors: &[String],
    backdrop_selectors: &[String],
) -> String {
    format!(
        r#"(() => {{
            const overlaySelectors = {overlays};
            const backdropSelectors = {backdrops};
            {VISIBLE_FN}
            const result = {{ hidden: 0, removed: 0 }};
            for (const sel of overlaySelectors) {{
                let nodes = [];
                try {{ nodes = Array.from(document.querySelectorAll(sel)); }} catch (_) {{ continue; }}
                for (const el of nodes) {{
                    if (!isVisible(el)) continue;
                    try {{
                        el.style.setProperty('display', 'none', 'important');
                        el.style.setProperty('visibility', 'hidden', 'important');
                        el.style.setProperty('opacity', '0', 'important');
                        el.classList.remove('show', 'in', 'active');
                        result.hidden++;
                    }} catch (_) {{}}
                }}
            }}
            for (const sel of backdropSelectors) {{
                let nodes = [];
                try {{ nodes = Array.from(document.querySelectorAll(sel)); }} catch (_) {{ continue; }}
                for (const el of nodes) {{
                    try {{ el.remove(); result.removed++; }} catch (_) {{}}
                }}
            }}
            return result;
        }})()"#,
        overlays = js_array(overlay_selectors),
        backdrops = js_array(backdrop_selectors),
    )
}

/// Collect visible text from explicit error containers. Returns `[string]`.
pub(crate) fn error_texts(error_selectors: &[String]) -> String {
    format!(
        r#"(() => {{
            const errorSelectors = {selectors};
            const texts = [];
            for (const sel of errorSelectors) {{
                let nodes = [];
                try {{ nodes = Array.from(document.querySelectorAll(sel)); }} catch (_) {{ continue; }}
                for (const el of nodes) {{
                    const text = (el.textContent || '').trim();
                    if (text && !texts.includes(text)) texts.push(text);
                }}
            }}
            return texts.slice(0, 20);
        }})()"#,
        selectors = js_array(error_selectors),
    )
}

/// Probe the specialties status page. Returns
/// `{loading, errors, hasTable, hasModifyColumn, buttonCount, specialties: [{id, cells}]}`.
pub(crate) fn status_page_probe() -> String {
    r#"(() => {
        const bodyText = (document.body && (document.body.textContent || document.body.innerText)) || '';
        const info = {
            loading: bodyText.toLowerCase().includes('buscando especialidades'),
            errors: [],
            hasTable: false,
            hasModifyColumn: false,
            buttonCount: 0,
            specialties: []
        };
        try {
            document.querySelectorAll('b, span, div').forEach(el => {
                const text = (el.textContent || '').trim();
                if ((text.includes('Error:') || text.includes('Atención!')) && !info.errors.includes(text)) {
                    info.errors.push(text);
                }
            });
        } catch (_) {}
        try {
            document.querySelectorAll('table').forEach(table => {
                const headers = Array.from(table.querySelectorAll('th')).map(th => th.textContent.trim());
                if (headers.length === 0) return;
                info.hasTable = true;
                if (headers.some(h => h.toLowerCase().includes('modificar'))) info.hasModifyColumn = true;
                const buttons = Array.from(table.querySelectorAll('input[type="submit"]'));
                info.buttonCount += buttons.length;
                buttons.forEach(btn => {
                    const row = btn.closest('tr');
                    if (!row) return;
                    info.specialties.push({
                        id: btn.id || btn.name || 'sin-id',
                        cells: Array.from(row.querySelectorAll('td')).map(td => td.textContent.trim())
                    });
                });
            });
        } catch (_) {}
        info.errors = info.errors.slice(0, 10);
        return info;
    })()"#
        .to_string()
}

/// Wait for resource-count stability as a network-idle heuristic.
/// Returns `{ok, readyState, resourceCount, waitedMs}`.
pub(crate) fn network_idle(timeout_ms: u64, idle_ms: u64) -> String {
    format!(
        r#"(async () => {{
            const timeoutMs = {timeout_ms};
            const idleMs = {idle_ms};
            const interval = 250;
            const start = Date.now();
            let lastCount = 0;
            let stableMs = 0;
            try {{ lastCount = performance.getEntriesByType('resource').length; }} catch (_) {{}}
            while (Date.now() - start < timeoutMs) {{
                await new Promise(r => setTimeout(r, interval));
                let curCount = lastCount;
                try {{ curCount = performance.getEntriesByType('resource').length; }} catch (_) {{}}
                if (document.readyState === 'complete' && curCount === lastCount) {{
                    stableMs += interval;
                    if (stableMs >= idleMs) {{
                        return {{ ok: true, readyState: document.readyState, resourceCount: curCount, waitedMs: Date.now() - start }};
                    }}
                }} else {{
                    stableMs = 0;
                }}
                lastCount = curCount;
            }}
            return {{ ok: false, readyState: document.readyState, resourceCount: lastCount, waitedMs: Date.now() - start }};
        }})()"#,
    )
}

/// Clear client-side storage and stray autofilled fields.
pub(crate) fn clear_storage() -> String {
    r#"(async () => {
        try { localStorage.clear(); } catch (_) {}
        try { sessionStorage.clear(); } catch (_) {}
        try {
            if ('indexedDB' in window && indexedDB.databases) {
                const databases = await indexedDB.databases();
                await Promise.all(databases.map(db => new Promise(resolve => {
                    const req = indexedDB.deleteDatabase(db.name);
                    req.onsuccess = () => resolve();
                    req.onerror = () => resolve();
                })));
            }
        } catch (_) {}
        try {
            document.querySelectorAll('input[type="text"], input[type="email"], input[type="tel"]').forEach(input => {
                input.value = '';
                input.dispatchEvent(new Event('input', { bubbles: true }));
                input.dispatchEvent(new Event('change', { bubbles: true }));
            });
        } catch (_) {}
        return true;
    })()"#
        .to_string()
}

/// Set a field value directly, firing input/change events.
pub(crate) fn set_field_value(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
            let el = null;
            try {{ el = document.querySelector({sel}); }} catch (_) {{}}
            if (!el) return false;
            el.value = {val};
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
        }})()"#,
        sel = js_str(selector),
        val = js_str(value),
    )
}

/// Read a field's current value ('' when the element is missing).
pub(crate) fn get_field_value(selector: &str) -> String {
    format!(
        r#"(() => {{
            try {{
                const el = document.querySelector({sel});
                return el && typeof el.value === 'string' ? el.value : '';
            }} catch (_) {{ return ''; }}
        }})()"#,
        sel = js_str(selector),
    )
}

/// Whether any element matches the selector.
pub(crate) fn selector_exists(selector: &str) -> String {
    format!(
        r#"(() => {{
            try {{ return !!document.querySelector({sel}); }} catch (_) {{ return false; }}
        }})()"#,
        sel = js_str(selector),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_are_embedded_as_json_literals() {
        let script = overlay_probe(&["[role=\"dialog\"]".to_string()]);
        assert!(script.contains(r#"["[role=\"dialog\"]"]"#));
    }

    #[test]
    fn field_scripts_quote_values() {
        let script = set_field_value("input[name=\"txtRut\"]", "18977386-2");
        assert!(script.contains(r#""input[name=\"txtRut\"]""#));
        assert!(script.contains(r#""18977386-2""#));
    }

    #[test]
    fn probe_scripts_never_embed_raw_braces_from_rules() {
        // A hostile selector must not break out of the string literal.
        let script = selector_exists("a\"); alert(1); (\"");
        assert!(script.contains(r#""a\"); alert(1); (\"""#));
    }
}
