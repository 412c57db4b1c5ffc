use super::*;

#[test]
fn registration_is_idempotent() {
    register_custom_metrics();
    register_custom_metrics();
}

#[test]
fn rendered_metrics_include_registered_collectors() {
    register_custom_metrics();
    FRAMING_ERRORS.inc();

    let body = render_metrics();

    assert!(body.contains("confr_framing_errors"));
}
