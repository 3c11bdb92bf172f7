use super::*;

// Each test touches its own variable names so parallel runs don't race.

#[test]
fn env_parse_falls_back_on_missing_or_garbage() {
    let key = "__TEST_CFG_PARSE_1207__";
    assert_eq!(env_parse(key, 42_i64), 42);
    unsafe { std::env::set_var(key, "not-a-number") };
    assert_eq!(env_parse(key, 42_i64), 42);
    unsafe { std::env::set_var(key, " 17 ") };
    assert_eq!(env_parse(key, 42_i64), 17);
    unsafe { std::env::remove_var(key) };
}

#[test]
fn env_bool_variants() {
    let key = "__TEST_CFG_BOOL_5531__";
    for (val, expected) in [("1", Some(true)), ("YES", Some(true)), ("off", Some(false)), ("maybe", None)] {
        unsafe { std::env::set_var(key, val) };
        assert_eq!(env_bool(key), expected, "value {val:?}");
    }
    unsafe { std::env::remove_var(key) };
    assert_eq!(env_bool(key), None);
}

#[test]
fn timeline_default_matches_constants() {
    let cfg = TimelineConfig::default();
    assert_eq!(cfg.batch_size, DEFAULT_TIMELINE_BATCH_SIZE);
    assert_eq!(cfg.page_size, DEFAULT_TIMELINE_PAGE_SIZE);
}

#[test]
fn whatsapp_config_requires_token_and_phone_id() {
    unsafe {
        std::env::remove_var("WHATSAPP_ACCESS_TOKEN");
        std::env::remove_var("WHATSAPP_PHONE_NUMBER_ID");
    }
    assert!(WhatsAppConfig::from_env().is_none());

    unsafe {
        std::env::set_var("WHATSAPP_ACCESS_TOKEN", "token");
        std::env::set_var("WHATSAPP_PHONE_NUMBER_ID", "12345");
        std::env::set_var("WHATSAPP_API_BASE_URL", "https://wa.example.test/");
    }
    let cfg = WhatsAppConfig::from_env().unwrap();
    assert_eq!(cfg.api_version, DEFAULT_WHATSAPP_API_VERSION);
    assert_eq!(cfg.default_country_code, "972");
    assert_eq!(cfg.phone_endpoint(), "https://wa.example.test/v19.0/12345");

    unsafe {
        std::env::remove_var("WHATSAPP_ACCESS_TOKEN");
        std::env::remove_var("WHATSAPP_PHONE_NUMBER_ID");
        std::env::remove_var("WHATSAPP_API_BASE_URL");
    }
}

#[test]
fn graph_config_builds_token_url_and_unescapes_signature() {
    unsafe {
        std::env::set_var("GRAPH_TENANT_ID", "tenant-1");
        std::env::set_var("GRAPH_CLIENT_ID", "client");
        std::env::set_var("GRAPH_CLIENT_SECRET", "secret");
        std::env::set_var("GRAPH_MAILBOX", "office@firm.test");
        std::env::set_var("EMAIL_SIGNATURE", "Regards,\\nThe Firm");
    }
    let cfg = GraphConfig::from_env().unwrap();
    assert_eq!(cfg.token_url(), "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token");
    assert_eq!(cfg.base_url, DEFAULT_GRAPH_BASE_URL);
    assert_eq!(cfg.signature.as_deref(), Some("Regards,\nThe Firm"));

    unsafe { std::env::remove_var("GRAPH_MAILBOX") };
    assert!(GraphConfig::from_env().is_none());

    unsafe {
        std::env::remove_var("GRAPH_TENANT_ID");
        std::env::remove_var("GRAPH_CLIENT_ID");
        std::env::remove_var("GRAPH_CLIENT_SECRET");
        std::env::remove_var("EMAIL_SIGNATURE");
    }
}
