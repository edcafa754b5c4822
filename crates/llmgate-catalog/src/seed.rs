use rust_decimal_macros::dec;

use crate::model::{
    ModelCatalogEntry, ProviderCapabilities, ProviderCatalogEntry, ProviderMapping,
    ProviderStatus, Stability,
};

fn provider(id: &str, display_name: &str, color: &str, website: &str) -> ProviderCatalogEntry {
    ProviderCatalogEntry {
        id: id.to_string(),
        display_name: display_name.to_string(),
        capabilities: ProviderCapabilities {
            streaming: true,
            cancellation: true,
            json_output: true,
        },
        color: color.to_string(),
        website: website.to_string(),
        status: ProviderStatus::Active,
    }
}

fn mapping(provider_id: &str, model_name: &str) -> ProviderMapping {
    ProviderMapping {
        provider_id: provider_id.to_string(),
        model_name: model_name.to_string(),
        input_price: None,
        output_price: None,
        image_input_price: None,
        request_price: None,
        context_size: None,
        supported_parameters: None,
        supports_responses_api: true,
        discount: None,
        stability: None,
    }
}

/// Built-in catalog covering the providers named in spec §1. Pricing is
/// representative, not a pinned price list, and is meant to satisfy
/// `cheapest_model_for`/`cheapest_from_available` and the free-model quota
/// tests (§8 scenario 6) out of the box; deployments load their own catalog.
pub fn seed_catalog() -> (Vec<ProviderCatalogEntry>, Vec<ModelCatalogEntry>) {
    let providers = vec![
        provider("openai", "OpenAI", "#10A37F", "https://openai.com"),
        provider("anthropic", "Anthropic", "#D4A27F", "https://anthropic.com"),
        provider("google", "Google", "#4285F4", "https://ai.google.dev"),
        provider("xai", "xAI", "#000000", "https://x.ai"),
        provider("groq", "Groq", "#F55036", "https://groq.com"),
        provider("deepseek", "DeepSeek", "#4D6BFE", "https://deepseek.com"),
        provider("perplexity", "Perplexity", "#20808D", "https://perplexity.ai"),
        provider("mistral", "Mistral", "#FA520F", "https://mistral.ai"),
        provider("zai", "ZAI", "#6236FF", "https://bigmodel.cn"),
    ];

    let gpt4o = {
        let mut openai = mapping("openai", "gpt-4o");
        openai.input_price = Some(dec!(2.50) / dec!(1000000));
        openai.output_price = Some(dec!(10.00) / dec!(1000000));
        openai.image_input_price = Some(dec!(0.001275));
        openai.context_size = Some(128_000);
        ModelCatalogEntry {
            id: "gpt-4o".to_string(),
            family: "gpt-4o".to_string(),
            supports_system_role: true,
            json_output: true,
            vision: true,
            free: false,
            stability: Stability::Stable,
            deprecated_at: None,
            providers: vec![openai],
        }
    };

    let gpt5 = {
        let mut openai = mapping("openai", "gpt-5");
        openai.input_price = Some(dec!(5.00) / dec!(1000000));
        openai.output_price = Some(dec!(15.00) / dec!(1000000));
        openai.context_size = Some(400_000);
        ModelCatalogEntry {
            id: "gpt-5".to_string(),
            family: "gpt-5".to_string(),
            supports_system_role: true,
            json_output: true,
            vision: true,
            free: false,
            stability: Stability::Beta,
            deprecated_at: None,
            providers: vec![openai],
        }
    };

    let claude_sonnet = {
        let mut anthropic = mapping("anthropic", "claude-sonnet-4-5-20250929");
        anthropic.input_price = Some(dec!(3.00) / dec!(1000000));
        anthropic.output_price = Some(dec!(15.00) / dec!(1000000));
        anthropic.image_input_price = Some(dec!(0.0048));
        anthropic.context_size = Some(200_000);
        ModelCatalogEntry {
            id: "claude-sonnet-4.5".to_string(),
            family: "claude".to_string(),
            supports_system_role: true,
            json_output: false,
            vision: true,
            free: false,
            stability: Stability::Stable,
            deprecated_at: None,
            providers: vec![anthropic],
        }
    };

    let gemini_flash = {
        let mut google = mapping("google", "gemini-2.5-flash");
        google.input_price = Some(dec!(0.30) / dec!(1000000));
        google.output_price = Some(dec!(2.50) / dec!(1000000));
        google.context_size = Some(1_000_000);
        ModelCatalogEntry {
            id: "gemini-2.5-flash".to_string(),
            family: "gemini".to_string(),
            supports_system_role: false,
            json_output: true,
            vision: true,
            free: false,
            stability: Stability::Stable,
            deprecated_at: None,
            providers: vec![google],
        }
    };

    // Multi-provider model: llama hosted by both Groq and xAI at different
    // prices, used to exercise `cheapest_from_available`.
    let llama = {
        let mut groq = mapping("groq", "llama-3.3-70b-versatile");
        groq.input_price = Some(dec!(0.59) / dec!(1000000));
        groq.output_price = Some(dec!(0.79) / dec!(1000000));
        let mut xai = mapping("xai", "llama-3.3-70b");
        xai.input_price = Some(dec!(1.00) / dec!(1000000));
        xai.output_price = Some(dec!(1.00) / dec!(1000000));
        ModelCatalogEntry {
            id: "llama-3.3-70b".to_string(),
            family: "llama".to_string(),
            supports_system_role: true,
            json_output: false,
            vision: false,
            free: false,
            stability: Stability::Stable,
            deprecated_at: None,
            providers: vec![groq, xai],
        }
    };

    let deepseek_free = {
        let mut deepseek = mapping("deepseek", "deepseek-chat");
        deepseek.input_price = Some(dec!(0));
        deepseek.output_price = Some(dec!(0));
        ModelCatalogEntry {
            id: "deepseek-chat-free".to_string(),
            family: "deepseek".to_string(),
            supports_system_role: true,
            json_output: true,
            vision: false,
            free: true,
            stability: Stability::Beta,
            deprecated_at: None,
            providers: vec![deepseek],
        }
    };

    let glm_airx = {
        let mut zai = mapping("zai", "glm-4.5-airx");
        zai.input_price = Some(dec!(0.20) / dec!(1000000));
        zai.output_price = Some(dec!(1.10) / dec!(1000000));
        ModelCatalogEntry {
            id: "glm-4.5-airx".to_string(),
            family: "glm".to_string(),
            supports_system_role: true,
            json_output: false,
            vision: false,
            free: false,
            stability: Stability::Beta,
            deprecated_at: None,
            providers: vec![zai],
        }
    };

    (
        providers,
        vec![gpt4o, gpt5, claude_sonnet, gemini_flash, llama, deepseek_free, glm_airx],
    )
}
