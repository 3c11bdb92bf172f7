//! Acting-employee extractor.
//!
//! There is no login on this API; the CRM front end forwards the signed-in
//! employee's display name in `X-Employee-Name`. Missing or blank headers
//! resolve to `"system"`.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const EMPLOYEE_HEADER: &str = "x-employee-name";
pub const FALLBACK_EMPLOYEE: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Employee(pub String);

impl Employee {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Employee
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let name = parts
            .headers
            .get(EMPLOYEE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(FALLBACK_EMPLOYEE);
        Ok(Self(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Employee {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(EMPLOYEE_HEADER, value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        Employee::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn reads_trimmed_header() {
        assert_eq!(extract(Some("  Rina Azulay ")).await.as_str(), "Rina Azulay");
    }

    #[tokio::test]
    async fn missing_or_blank_falls_back() {
        assert_eq!(extract(None).await.as_str(), FALLBACK_EMPLOYEE);
        assert_eq!(extract(Some("   ")).await.as_str(), FALLBACK_EMPLOYEE);
    }
}
