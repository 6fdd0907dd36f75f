//! Diagnostic error pages and the client retry contract
//!
//! Unrecoverable failures render a self-contained HTML page offering three
//! ways forward: plain retry (incremented `retry` counter), retry with
//! rewriting bypassed, and a link back to the landing page. The server never
//! caps retries itself; the counter just round-trips.

use crate::error::RefractError;
use crate::models::ErrorReport;

/// Build the report consumed by the page renderer
pub fn report_for(err: &RefractError, target_url: &str, retry_count: u32) -> ErrorReport {
    ErrorReport {
        target_url: target_url.to_string(),
        kind: err.kind(),
        message: err.to_string(),
        retry_count,
    }
}

/// Render the diagnostic page
pub fn render(report: &ErrorReport, prefix: &str, landing: &str) -> String {
    let target = escape_html(&report.target_url);
    let message = escape_html(&report.message);
    let encoded_target = urlencoding::encode(&report.target_url);
    let next_retry = report.retry_count.saturating_add(1);

    let retry_href = format!("{prefix}?url={encoded_target}&retry={next_retry}");
    let bypass_href = format!("{prefix}?url={encoded_target}&retry={next_retry}&bypass=true");
    let landing_href = escape_html(landing);

    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <title>Proxy Error</title>
    <style>
      body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 800px; margin: 0 auto; padding: 2rem; }}
      h1 {{ color: #e53e3e; }}
      .error-box {{ background-color: #f8f9fa; border: 1px solid #ddd; border-radius: 6px; padding: 1.5rem; margin: 2rem 0; }}
      .actions {{ margin-top: 2rem; }}
      .button {{ display: inline-block; background: #3182ce; color: white; padding: 0.5rem 1rem; border-radius: 0.25rem; text-decoration: none; margin-right: 0.5rem; }}
      .button.secondary {{ background: #718096; }}
    </style>
  </head>
  <body>
    <h1>Proxy Error</h1>
    <p>We encountered an error while trying to access: <strong>{target}</strong></p>

    <div class="error-box">
      <h3>Error Details</h3>
      <p>{message}</p>
      <p><small>kind: {kind} &middot; attempt {attempt}</small></p>
    </div>

    <div class="actions">
      <a href="{retry_href}" class="button">Try Again</a>
      <a href="{bypass_href}" class="button">Try Without Rewriting</a>
      <a href="{landing_href}" class="button secondary">Back</a>
    </div>
  </body>
</html>
"#,
        kind = report.kind,
        attempt = next_retry,
    )
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
