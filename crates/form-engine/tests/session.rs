use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Value, json};
use tokio::time::sleep;

use form_engine::form_spec::{Origin, SubmissionAssemblyError};
use form_engine::form_suggest::{FnSource, SuggestionFetchError, SuggestionSource};
use form_engine::{EngineConfig, FormBundle, FormSession, SessionError, SourceMap};

fn bundle() -> FormBundle {
    serde_json::from_value(json!({
        "form": {
            "id": "registration",
            "title": "Organisation registration",
            "version": "1.0",
            "fields": [
                { "name": "company_name", "type": "string", "required": true, "checks": [{ "check": "min_len", "min": 2 }] },
                { "name": "industry", "type": "enum", "required": true, "choices": ["Technology", "Healthcare", "Finance", "Retail", "Other"] },
                { "name": "industry_other", "type": "string" },
                { "name": "company_size", "type": "enum", "choices": ["1-10", "11-50", "51-200", "200+"] },
                { "name": "department", "type": "string" },
                { "name": "suggested_departments", "type": "list", "working_list": "departments" },
                { "name": "frameworks", "type": "list" },
                { "name": "email", "type": "string", "required": true, "checks": [{ "check": "email" }, { "check": "not_disposable_email" }] },
                { "name": "password", "type": "string", "required": true, "checks": [{ "check": "password_strength" }] },
                { "name": "confirm_password", "type": "string", "required": true, "checks": [{ "check": "matches_field", "field": "password" }] }
            ],
            "rules": [
                { "dependent": "industry_other", "source": "industry", "operator": "equals", "value": "Other", "effect": "show" },
                { "dependent": "industry_other", "source": "industry", "operator": "equals", "value": "Other", "effect": "require" }
            ],
            "steps": [
                { "id": "company", "fields": ["company_name", "industry", "industry_other", "company_size"] },
                { "id": "team", "fields": ["department", "suggested_departments", "frameworks"] },
                { "id": "account", "fields": ["email", "password", "confirm_password"] }
            ]
        },
        "categories": [
            {
                "name": "industry_defaults",
                "drivers": ["industry"],
                "targets": [
                    { "field": "department", "pointer": "suggested_departments.0" },
                    { "field": "suggested_departments" }
                ]
            },
            {
                "name": "insights",
                "drivers": ["industry", "company_size"],
                "targets": [{ "field": "frameworks", "pointer": "framework_recommendations" }]
            }
        ],
        "assembly": {
            "mappings": [
                { "field": "company_name", "key": "company.name" },
                { "field": "industry", "key": "company.industry" },
                { "field": "industry_other", "key": "company.industry_other" },
                { "field": "company_size", "key": "company.size" },
                { "field": "department", "key": "primary_department" },
                { "field": "suggested_departments", "omit": true },
                { "field": "email", "key": "account.email" },
                { "field": "password", "key": "account.password" },
                { "field": "confirm_password", "omit": true }
            ],
            "lists": [{ "list": "departments", "key": "departments" }]
        }
    }))
    .expect("bundle should deserialize")
}

fn industry_profile(industry: &str) -> Value {
    match industry {
        "Technology" => json!({
            "suggested_departments": ["Security", "Engineering", "Legal", "Customer Success"],
            "framework_recommendations": ["SOC 2", "ISO 27001", "NIST CSF"]
        }),
        "Healthcare" => json!({
            "suggested_departments": ["Compliance", "Clinical Operations", "IT", "Legal"],
            "framework_recommendations": ["HIPAA", "ISO 27001", "HITRUST"]
        }),
        _ => json!({
            "suggested_departments": ["Operations", "Finance"],
            "framework_recommendations": ["ISO 27001"]
        }),
    }
}

fn profile_source() -> Arc<dyn SuggestionSource> {
    Arc::new(FnSource::new(|request| {
        let payload = request.driver_str("industry").map(industry_profile);
        async move {
            payload.ok_or_else(|| SuggestionFetchError::InvalidPayload("industry not set".into()))
        }
        .boxed()
    }))
}

fn sources() -> SourceMap {
    let mut sources = SourceMap::new();
    sources.insert("industry_defaults".into(), profile_source());
    sources.insert("insights".into(), profile_source());
    sources
}

fn mount() -> FormSession {
    FormSession::from_bundle(bundle(), &EngineConfig::default(), sources()).expect("mount")
}

fn fill_company(session: &mut FormSession, industry: &str) {
    session
        .set_user("company_name", json!("Acme Cloud"))
        .expect("company");
    session
        .set_user("industry", json!(industry))
        .expect("industry");
    session
        .set_user("company_size", json!("51-200"))
        .expect("size");
}

fn fill_account(session: &mut FormSession) {
    session
        .set_user("email", json!("ops@acme.example"))
        .expect("email");
    session
        .set_user("password", json!("Sup3r$ecret"))
        .expect("password");
    session
        .set_user("confirm_password", json!("Sup3r$ecret"))
        .expect("confirm");
}

#[tokio::test(start_paused = true)]
async fn registration_wizard_runs_to_submission() {
    let mut session = mount();
    fill_company(&mut session, "Technology");
    sleep(Duration::from_millis(600)).await;

    assert_eq!(session.get("department"), Some(json!("Security")));
    assert_eq!(
        session.get("frameworks"),
        Some(json!(["SOC 2", "ISO 27001", "NIST CSF"]))
    );
    assert!(
        session
            .add_list_entry("departments", "Finance")
            .expect("add")
    );

    assert!(session.next().ok);
    assert!(session.next().ok);
    assert_eq!(session.current_step(), 2);
    assert!(session.is_last_step());

    fill_account(&mut session);
    assert!(session.next().ok);
    assert_eq!(session.current_step(), 2);

    let payload = session.submit().expect("submit");
    assert_eq!(
        payload,
        json!({
            "company": { "name": "Acme Cloud", "industry": "Technology", "size": "51-200" },
            "primary_department": "Security",
            "frameworks": ["SOC 2", "ISO 27001", "NIST CSF"],
            "account": { "email": "ops@acme.example", "password": "Sup3r$ecret" },
            "departments": ["Security", "Engineering", "Legal", "Customer Success", "Finance"]
        })
    );
    assert_eq!(session.submit().expect("resubmit"), payload);
}

#[tokio::test(start_paused = true)]
async fn manual_department_survives_industry_change_until_reset() {
    let mut session = mount();
    fill_company(&mut session, "Technology");
    sleep(Duration::from_millis(600)).await;

    session
        .set_user("department", json!("Custom Team"))
        .expect("department");
    session
        .set_user("industry", json!("Healthcare"))
        .expect("industry");
    sleep(Duration::from_millis(600)).await;

    assert_eq!(session.get("department"), Some(json!("Custom Team")));
    assert_eq!(session.discarded_writes(), 1);
    assert_eq!(session.sync_stats().manual_override_drops, 1);
    assert_eq!(
        session.merged_list("departments"),
        vec!["Compliance", "Clinical Operations", "IT", "Legal"]
    );

    session.reset_field("department").expect("reset");
    assert!(!session.is_manual("department"));
    sleep(Duration::from_millis(1)).await;
    assert_eq!(session.get("department"), Some(json!("Compliance")));
}

#[tokio::test(start_paused = true)]
async fn hidden_follow_up_only_blocks_when_shown() {
    let mut session = mount();
    fill_company(&mut session, "Other");

    let result = session.next();
    assert!(!result.ok);
    assert!(result.errors.contains_key("industry_other"));
    assert!(session.visibility()["industry_other"].is_mandatory());

    session
        .set_user("industry_other", json!("Aerospace"))
        .expect("other");
    assert!(session.next().ok);

    assert!(session.back());
    session
        .set_user("industry", json!("Retail"))
        .expect("industry");
    assert!(!session.visibility()["industry_other"].visible);
    assert_eq!(session.get("industry_other"), Some(json!("Aerospace")));
}

#[tokio::test(start_paused = true)]
async fn submit_rechecks_mandatory_fields() {
    let mut session = mount();
    fill_company(&mut session, "Retail");
    fill_account(&mut session);
    assert!(session.next().ok);
    assert!(session.next().ok);
    assert!(session.next().ok);

    session
        .set_user("industry", json!("Other"))
        .expect("industry");
    let err = session.submit().expect_err("industry_other is empty");
    assert!(matches!(
        err,
        SessionError::Assembly(SubmissionAssemblyError::MissingMandatory { ref missing })
            if missing == &vec!["industry_other".to_string()]
    ));
}

#[tokio::test(start_paused = true)]
async fn echoed_suggestion_is_not_a_manual_edit() {
    let mut session = mount();
    session
        .set_user("industry", json!("Technology"))
        .expect("industry");
    sleep(Duration::from_millis(600)).await;

    let origin = session
        .observe("department", json!("Security"))
        .expect("observe");
    assert_eq!(origin, Origin::Engine);
    assert!(!session.is_manual("department"));

    let origin = session
        .observe("department", json!("Platform"))
        .expect("observe");
    assert_eq!(origin, Origin::User);
    assert!(session.is_manual("department"));
}

#[tokio::test(start_paused = true)]
async fn closed_session_rejects_writes_and_applies_nothing() {
    let mut session = mount();
    session
        .set_user("industry", json!("Technology"))
        .expect("industry");
    session.shutdown();
    sleep(Duration::from_secs(1)).await;

    assert!(session.is_closed());
    assert_eq!(session.get("department"), Some(Value::Null));
    assert_eq!(session.sync_stats().issued, 0);
    assert!(matches!(
        session.set_user("industry", json!("Retail")),
        Err(SessionError::Closed(id)) if id == "registration"
    ));
}

#[tokio::test]
async fn bundle_categories_need_sources() {
    let mut sources = sources();
    sources.remove("insights");
    let err = FormSession::from_bundle(bundle(), &EngineConfig::default(), sources)
        .err()
        .expect("missing source");
    assert!(matches!(err, SessionError::MissingSource(name) if name == "insights"));
}

#[tokio::test(start_paused = true)]
async fn mount_prefetch_uses_preset_values() {
    let mut session = mount();
    session
        .set_user("industry", json!("Finance"))
        .expect("industry");
    let issued = session.refresh_suggestions().expect("refresh");
    assert_eq!(issued.len(), 2);
    sleep(Duration::from_millis(1)).await;

    assert_eq!(session.get("department"), Some(json!("Operations")));
    assert_eq!(session.sync_stats().issued, 2);
}
