//! Site-knowledge tables: the selectors, phrases and URL markers the
//! classifier and the interstitial guard key on.
//!
//! These encode fragile knowledge of one site's markup and are the first
//! thing to break when the site changes, so they are plain data: versioned,
//! serde-loadable from a JSON file, with the current site tables as the
//! default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::WatchError;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Tables driving page classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    /// URL fragment the site redirects to when no slots exist at all.
    pub no_availability_url_pattern: String,
    /// URL fragments identifying the step/status pages of the booking flow.
    pub step_page_url_markers: Vec<String>,
    /// URL fragment identifying the specialties status page.
    pub status_page_url_marker: String,
    /// Selectors whose visible text is collected as explicit error markers.
    pub error_text_selectors: Vec<String>,
    /// Regex sources matched against raw HTML for error banners.
    pub error_patterns: Vec<String>,
    /// Phrases (lower-case) that tag an error marker as a session timeout.
    pub timeout_phrases: Vec<String>,
    /// Phrases (lower-case) that tag an error marker as no-availability.
    pub no_availability_phrases: Vec<String>,
    /// Content keywords (lower-case) meaning no slots are open.
    pub no_availability_keywords: Vec<String>,
    /// Content keywords (lower-case) meaning slots are open.
    pub availability_keywords: Vec<String>,
    /// Structural controls that only render when a next step is reachable.
    pub next_step_selectors: Vec<String>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            no_availability_url_pattern: "paso-1.aspx?Error=No%20existen%20horas%20disponibles"
                .to_string(),
            step_page_url_markers: strings(&["paso-1.aspx", "estatus.aspx"]),
            status_page_url_marker: "estatus.aspx".to_string(),
            error_text_selectors: strings(&[
                ".error",
                ".alert",
                ".warning",
                "[class*=\"error\"]",
                "[class*=\"alert\"]",
                "div[style*=\"color:red\"]",
                "div[style*=\"color: red\"]",
                "span[style*=\"color:red\"]",
                "span[style*=\"color: red\"]",
            ]),
            // Banner-shaped patterns only: a bare no-availability phrase in the
            // body is a content keyword, not an error marker.
            error_patterns: strings(&[
                r"(?is)<b[^>]*>.*?Atención!.*?Error:.*?</b>",
                r"(?is)Atención!.*?Error:[^<]*",
                r"(?i)ud\. ha excedido el tiempo máximo de espera",
                r"(?i)tiempo máximo de espera",
                r"(?i)Buscando especialidades\.\.\.\.",
            ]),
            timeout_phrases: strings(&["tiempo máximo de espera", "excedido"]),
            no_availability_phrases: strings(&["no existen horas", "sin disponibilidad"]),
            no_availability_keywords: strings(&[
                "no existen horas disponibles",
                "sin disponibilidad",
                "no hay citas",
                "agendas llenas",
                "sin cupos",
                "ud. ha excedido el tiempo máximo de espera",
                "tiempo máximo de espera",
            ]),
            availability_keywords: strings(&[
                "seleccione fecha",
                "horarios disponibles",
                "agendar cita",
                "reservar hora",
            ]),
            next_step_selectors: strings(&[
                "select[name*=\"fecha\"]",
                "input[type=\"date\"]",
                ".calendar",
                "#calendario",
                "select[name*=\"hora\"]",
            ]),
        }
    }
}

/// Tables driving interstitial detection and dismissal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayRules {
    /// Structural selectors for overlay-like elements.
    pub overlay_selectors: Vec<String>,
    /// Selectors for close controls searched inside a detected overlay.
    pub close_control_selectors: Vec<String>,
    /// Visible texts recognized as close controls.
    pub close_control_texts: Vec<String>,
    /// Selectors for backdrop layers removed during forced dismissal.
    pub backdrop_selectors: Vec<String>,
}

impl Default for OverlayRules {
    fn default() -> Self {
        Self {
            overlay_selectors: strings(&[
                ".modal",
                ".popup",
                ".dialog",
                ".alert",
                "[role=\"dialog\"]",
                "[role=\"alertdialog\"]",
                ".modal.show",
                ".modal.fade.show",
                ".modal-backdrop",
                ".overlay",
                ".alert-dialog",
                ".swal-modal",
                ".sweetalert-modal",
                "div[style*=\"z-index\"]:not([style*=\"display: none\"])",
                "div[style*=\"position: fixed\"]",
                "div[style*=\"position: absolute\"][style*=\"top: 0\"]",
            ]),
            close_control_selectors: strings(&[
                "button[data-dismiss=\"modal\"]",
                ".close",
                ".btn-close",
                ".modal-close",
                "button.close",
                "[aria-label=\"Close\"]",
                "[aria-label=\"Cerrar\"]",
                ".fa-times",
                ".fa-close",
            ]),
            close_control_texts: strings(&["×", "Close", "Cerrar", "OK", "Aceptar"]),
            backdrop_selectors: strings(&[".modal-backdrop", ".fade.in", ".overlay"]),
        }
    }
}

/// The complete swappable rule set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Bumped whenever the site tables change shape.
    pub version: u32,
    pub classifier: ClassifierRules,
    pub overlay: OverlayRules,
}

impl RuleSet {
    /// Load a rule set from a JSON file, e.g. to track site markup changes
    /// without recompiling.
    pub fn load(path: &Path) -> Result<Self, WatchError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WatchError::InvalidConfig(format!("cannot read rules file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            WatchError::InvalidConfig(format!("malformed rules file {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_cover_the_known_site_markup() {
        let rules = ClassifierRules::default();
        assert!(rules
            .no_availability_keywords
            .contains(&"no existen horas disponibles".to_string()));
        assert!(rules
            .availability_keywords
            .contains(&"seleccione fecha".to_string()));
        assert!(rules.no_availability_url_pattern.contains("paso-1.aspx"));
    }

    #[test]
    fn default_error_patterns_compile() {
        for source in ClassifierRules::default().error_patterns {
            assert!(regex::Regex::new(&source).is_ok(), "pattern {source:?}");
        }
    }

    #[test]
    fn rule_set_round_trips_through_json() {
        let rules = RuleSet::default();
        let json = serde_json::to_string(&rules).unwrap();
        let back: RuleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.classifier.availability_keywords, rules.classifier.availability_keywords);
        assert_eq!(back.overlay.close_control_texts, rules.overlay.close_control_texts);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let partial = r#"{"version": 3, "classifier": {"availability_keywords": ["cupos libres"]}}"#;
        let rules: RuleSet = serde_json::from_str(partial).unwrap();
        assert_eq!(rules.version, 3);
        assert_eq!(rules.classifier.availability_keywords, vec!["cupos libres"]);
        // Untouched tables keep the site defaults.
        assert!(!rules.classifier.no_availability_keywords.is_empty());
        assert!(!rules.overlay.overlay_selectors.is_empty());
    }
}
