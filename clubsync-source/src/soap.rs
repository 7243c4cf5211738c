//! Minimal SOAP 1.1 envelope plumbing.
//!
//! The source exposes three WSDL services (`SynchronizationService`,
//! `IntegrationService`, `Competence2Service`); all three are called the
//! same way, so this module carries the one envelope shape all of them
//! share rather than generating bindings per service.

use serde::{Deserialize, de::DeserializeOwned};

use crate::error::SourceError;

#[derive(Debug, Deserialize)]
#[serde(rename = "Envelope")]
pub struct ResponseEnvelope<T> {
    #[serde(rename = "Body")]
    pub body: ResponseBody<T>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseBody<T> {
    #[serde(rename = "Fault")]
    pub fault: Option<SoapFault>,
    #[serde(rename = "$value")]
    pub content: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct SoapFault {
    #[serde(rename = "faultcode", default)]
    pub fault_code: String,
    #[serde(rename = "faultstring", default)]
    pub fault_string: String,
}

/// Assemble a SOAP envelope around already-serialized inner XML, POST
/// it, and parse the response envelope, surfacing a SOAP `Fault` as a
/// typed [`SourceError::ApplicationFault`]. The callers in
/// [`crate::client`] build their request bodies by hand because each
/// SOAP operation has a distinct flat field list and pulling in
/// per-operation request structs would only add indirection over what
/// `quick_xml`'s writer already does directly.
pub async fn call_raw<Resp>(
    client: &reqwest::Client,
    url: &str,
    soap_action: &str,
    body_xml: String,
) -> Result<Resp, SourceError>
where
    Resp: DeserializeOwned,
{
    let envelope = format!(
        "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap:Body>{body_xml}</soap:Body></soap:Envelope>"
    );

    let response = client
        .post(url)
        .header("Content-Type", "text/xml; charset=utf-8")
        .header("SOAPAction", soap_action)
        .body(envelope)
        .send()
        .await
        .map_err(SourceError::Unavailable)?;

    let text = response
        .text()
        .await
        .map_err(SourceError::RequestBodyError)?;

    let parsed: ResponseEnvelope<Resp> =
        quick_xml::de::from_str(&text).map_err(SourceError::EnvelopeParseError)?;

    if let Some(fault) = parsed.body.fault {
        return Err(SourceError::ApplicationFault {
            code: fault.fault_code,
            message: fault.fault_string,
        });
    }

    parsed
        .body
        .content
        .ok_or_else(|| SourceError::MalformedChange("empty SOAP body".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Dummy {
        #[serde(rename = "$text", default)]
        value: i64,
    }

    #[test]
    fn parses_a_fault_envelope_into_a_soap_fault() {
        let xml = r#"<Envelope><Body><Fault><faultcode>soap:Server</faultcode><faultstring>boom</faultstring></Fault></Body></Envelope>"#;
        let parsed: ResponseEnvelope<Dummy> = quick_xml::de::from_str(xml).unwrap();
        let fault = parsed.body.fault.expect("fault should be present");
        assert_eq!(fault.fault_code, "soap:Server");
        assert_eq!(fault.fault_string, "boom");
        assert!(parsed.body.content.is_none());
    }
}
