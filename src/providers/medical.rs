//! External medical data gateway (`medical` server).
//!
//! Every tool shapes exactly one upstream request. A `200` JSON body is the
//! result; anything else is a provider error.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::dispatch::{CallContext, CapabilityProvider, ProviderError, ToolBinding};
use crate::providers::http::{parse_json, status_error, HttpGateway};
use crate::tools::{Arguments, ParamKind, ParameterSpec, ToolDescriptor};
use crate::types::{HttpConfig, MedicalConfig, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MedicalOp {
    Icd11Lookup,
    FdaDrugSearch,
    FdaDeviceSearch,
    InfermedicaDiagnosis,
    NutritionFacts,
    NpiProviderLookup,
    CmsMarketplacePlans,
    CovidStatsGlobal,
    CovidStatsCountry,
    NhsScotlandData,
}

/// A fully shaped upstream call.
#[derive(Debug, Clone, PartialEq)]
struct UpstreamRequest {
    post: bool,
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(&'static str, String)>,
    body: Option<Value>,
}

impl UpstreamRequest {
    fn get(url: String) -> Self {
        Self {
            post: false,
            url,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    fn post(url: String, body: Value) -> Self {
        Self {
            post: true,
            body: Some(body),
            ..Self::get(url)
        }
    }

    fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

fn require_nonempty<'a>(args: &'a Arguments, name: &str) -> std::result::Result<&'a str, ProviderError> {
    let value = args.str(name)?;
    if value.trim().is_empty() {
        return Err(ProviderError::permanent(format!("{} is required", name)));
    }
    Ok(value)
}

fn present<'a>(args: &'a Arguments, name: &str) -> std::result::Result<Option<&'a str>, ProviderError> {
    Ok(args.opt_str(name)?.filter(|s| !s.trim().is_empty()))
}

/// Turn validated arguments into the upstream request for `op`.
fn shape(op: MedicalOp, args: &Arguments, urls: &MedicalConfig) -> std::result::Result<UpstreamRequest, ProviderError> {
    let request = match op {
        MedicalOp::Icd11Lookup => {
            let base = urls.icd11_base_url.trim_end_matches('/');
            if let Some(entity_id) = present(args, "entity_id")? {
                UpstreamRequest::get(format!("{}/icd/entity/{}", base, entity_id))
            } else if let Some(term) = present(args, "search_term")? {
                UpstreamRequest::get(format!("{}/icd/release/11/2024-01/mms/search", base)).query("q", term)
            } else {
                return Err(ProviderError::permanent("Either entity_id or search_term is required"));
            }
        }
        MedicalOp::FdaDrugSearch => {
            let term = require_nonempty(args, "search_term")?;
            UpstreamRequest::get(format!("{}/drug/label.json", urls.fda_base_url.trim_end_matches('/')))
                .query(
                    "search",
                    format!("openfda.brand_name:{} OR openfda.generic_name:{}", term, term),
                )
                .query("limit", args.int("limit")?)
        }
        MedicalOp::FdaDeviceSearch => {
            let term = require_nonempty(args, "search_term")?;
            UpstreamRequest::get(format!("{}/device/510k.json", urls.fda_base_url.trim_end_matches('/')))
                .query("search", format!("device_name:{}", term))
                .query("limit", args.int("limit")?)
        }
        MedicalOp::InfermedicaDiagnosis => {
            let api_key = require_nonempty(args, "api_key")?;
            let symptoms = args.str_list("symptoms")?;
            if symptoms.is_empty() {
                return Err(ProviderError::permanent("symptoms must not be empty"));
            }
            let evidence: Vec<Value> = symptoms
                .iter()
                .map(|s| json!({"id": s.to_lowercase().replace(' ', "_"), "choice_id": "present"}))
                .collect();
            let body = json!({
                "sex": args.str("sex")?,
                "age": {"value": args.int("age")?},
                "evidence": evidence,
            });
            UpstreamRequest::post(
                format!("{}/v3/diagnosis", urls.infermedica_base_url.trim_end_matches('/')),
                body,
            )
            .header("App-Id", api_key)
            .header("App-Key", api_key)
        }
        MedicalOp::NutritionFacts => {
            let query = require_nonempty(args, "food_query")?;
            UpstreamRequest::post(
                format!("{}/v2/natural/nutrients", urls.nutritionix_base_url.trim_end_matches('/')),
                json!({"query": query}),
            )
            .header("x-app-id", require_nonempty(args, "app_id")?)
            .header("x-app-key", require_nonempty(args, "api_key")?)
        }
        MedicalOp::NpiProviderLookup => {
            let mut request = UpstreamRequest::get(format!("{}/api/", urls.npi_base_url.trim_end_matches('/')));
            if let Some(number) = present(args, "npi_number")? {
                request = request.query("number", number);
            } else if let Some(name) = present(args, "provider_name")? {
                let parts: Vec<&str> = name.split_whitespace().collect();
                request = match parts.split_first() {
                    Some((first, rest)) if !rest.is_empty() => {
                        request.query("first_name", first).query("last_name", rest.join(" "))
                    }
                    _ => request.query("last_name", name.trim()),
                };
            } else {
                return Err(ProviderError::permanent("Either npi_number or provider_name is required"));
            }
            if let Some(state) = present(args, "state")? {
                request = request.query("state", state);
            }
            request
        }
        MedicalOp::CmsMarketplacePlans => {
            let mut request = UpstreamRequest::get(format!(
                "{}/api/v1/plans/search",
                urls.cms_base_url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", require_nonempty(args, "api_key")?))
            .query("zipcode", require_nonempty(args, "zip_code")?)
            .query("market", "Individual");
            if let Some(age) = args.opt_int("age")? {
                request = request.query("age", age);
            }
            request
        }
        MedicalOp::CovidStatsGlobal => {
            UpstreamRequest::get(format!("{}/v3/covid-19/all", urls.disease_base_url.trim_end_matches('/')))
        }
        MedicalOp::CovidStatsCountry => {
            let country = require_nonempty(args, "country")?;
            UpstreamRequest::get(format!(
                "{}/v3/covid-19/countries/{}",
                urls.disease_base_url.trim_end_matches('/'),
                country
            ))
        }
        MedicalOp::NhsScotlandData => {
            let mut request = UpstreamRequest::get(format!(
                "{}/api/3/action/datastore_search",
                urls.nhs_scotland_base_url.trim_end_matches('/')
            ))
            .query("resource_id", require_nonempty(args, "resource_id")?);
            if let Some(query) = present(args, "query")? {
                request = request.query("q", query);
            }
            request
        }
    };
    Ok(request)
}

#[derive(Debug)]
struct MedicalTool {
    gateway: Arc<HttpGateway>,
    urls: Arc<MedicalConfig>,
    op: MedicalOp,
}

#[async_trait]
impl CapabilityProvider for MedicalTool {
    async fn invoke(&self, args: Arguments, ctx: CallContext) -> std::result::Result<Value, ProviderError> {
        let shaped = shape(self.op, &args, &self.urls)?;
        let client = self.gateway.client().await?;

        let mut request = if shaped.post {
            client.post(&shaped.url)
        } else {
            client.get(&shaped.url)
        };
        if !shaped.query.is_empty() {
            request = request.query(&shaped.query);
        }
        for (name, value) in &shaped.headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(body) = &shaped.body {
            request = request.json(body);
        }

        let response = self.gateway.send(request, &ctx).await?;
        let status = response.status();
        let body = self.gateway.text(response, &ctx).await?;
        if status != StatusCode::OK {
            tracing::warn!(tool = ctx.tool(), status = status.as_u16(), "upstream rejected request");
            return Err(status_error(status, &body));
        }
        parse_json(&body)
    }

    fn mark_suspect(&self) {
        self.gateway.mark_suspect();
    }
}

fn text(name: &str, description: &str) -> ParameterSpec {
    ParameterSpec::required(name, ParamKind::String, description)
}

fn opt_text(name: &str, description: &str) -> ParameterSpec {
    ParameterSpec::optional(name, ParamKind::String, description)
}

fn limit() -> ParameterSpec {
    ParameterSpec::optional("limit", ParamKind::Integer, "Number of results to return (default: 5)")
        .with_default(json!(5))
}

fn descriptors() -> Vec<(ToolDescriptor, MedicalOp)> {
    vec![
        (
            ToolDescriptor::new("icd11_lookup", "Look up ICD-11 codes and medical conditions from WHO")
                .param(opt_text("entity_id", "ICD-11 entity ID to look up (e.g., '1435254666')"))
                .param(opt_text("search_term", "Search term for medical conditions")),
            MedicalOp::Icd11Lookup,
        ),
        (
            ToolDescriptor::new("fda_drug_search", "Search FDA drug database for drug information")
                .param(text("search_term", "Drug name to search for (e.g., 'aspirin')"))
                .param(limit()),
            MedicalOp::FdaDrugSearch,
        ),
        (
            ToolDescriptor::new(
                "fda_device_search",
                "Search FDA device database for medical device information",
            )
            .param(text("search_term", "Device name or type to search for"))
            .param(limit()),
            MedicalOp::FdaDeviceSearch,
        ),
        (
            ToolDescriptor::new(
                "infermedica_diagnosis",
                "Get medical diagnosis suggestions from Infermedica (requires API key)",
            )
            .param(ParameterSpec::required("age", ParamKind::Integer, "Patient age"))
            .param(text("sex", "Patient sex").one_of(["male", "female"]))
            .param(ParameterSpec::required(
                "symptoms",
                ParamKind::ArrayOfString,
                "List of symptoms",
            ))
            .param(text("api_key", "Infermedica API key")),
            MedicalOp::InfermedicaDiagnosis,
        ),
        (
            ToolDescriptor::new(
                "nutrition_facts",
                "Get nutritional information for foods using Nutritionix API",
            )
            .param(text(
                "food_query",
                "Food description (e.g., '1 cup rice', '100g chicken breast')",
            ))
            .param(text("api_key", "Nutritionix API key"))
            .param(text("app_id", "Nutritionix App ID")),
            MedicalOp::NutritionFacts,
        ),
        (
            ToolDescriptor::new(
                "npi_provider_lookup",
                "Look up healthcare provider information using NPI number or name",
            )
            .param(opt_text("npi_number", "10-digit NPI number"))
            .param(opt_text("provider_name", "Provider name (first and last)"))
            .param(opt_text("state", "State abbreviation (e.g., 'CA', 'NY')")),
            MedicalOp::NpiProviderLookup,
        ),
        (
            ToolDescriptor::new("cms_marketplace_plans", "Search CMS Marketplace for health insurance plans")
                .param(text("zip_code", "ZIP code for plan search"))
                .param(ParameterSpec::optional("age", ParamKind::Integer, "Age for premium calculation"))
                .param(text("api_key", "CMS API key")),
            MedicalOp::CmsMarketplacePlans,
        ),
        (
            ToolDescriptor::new("covid_stats_global", "Get global COVID-19 statistics"),
            MedicalOp::CovidStatsGlobal,
        ),
        (
            ToolDescriptor::new("covid_stats_country", "Get COVID-19 statistics for a specific country")
                .param(text("country", "Country name (e.g., 'USA', 'UK', 'India')")),
            MedicalOp::CovidStatsCountry,
        ),
        (
            ToolDescriptor::new("nhs_scotland_data", "Search NHS Scotland open data")
                .param(text("resource_id", "Resource ID for the dataset"))
                .param(opt_text("query", "Search query")),
            MedicalOp::NhsScotlandData,
        ),
    ]
}

/// Tool bindings for the medical data gateway.
pub fn toolkit(http: HttpConfig, urls: MedicalConfig) -> Result<Vec<ToolBinding>> {
    let gateway = Arc::new(HttpGateway::new(http)?);
    let urls = Arc::new(urls);
    Ok(descriptors()
        .into_iter()
        .map(|(descriptor, op)| {
            let provider: Arc<dyn CapabilityProvider> = Arc::new(MedicalTool {
                gateway: gateway.clone(),
                urls: urls.clone(),
                op,
            });
            ToolBinding::new(descriptor, provider)
        })
        .collect())
}
