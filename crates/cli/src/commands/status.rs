//! `handson status`: show the effective configuration.

use handson_config::AppConfig;

fn enabled(value: Option<&str>) -> &str {
    value.unwrap_or("(not configured)")
}

pub fn run(config: &AppConfig) {
    println!("Hands-on agent runtime status");
    println!("=============================");
    println!("  Region:            {}", config.aws.region);
    println!("  Provider:          {}", config.model.provider);
    println!("  Model:             {}", config.model.model_id);
    println!("  Temperature:       {}", config.model.temperature);
    println!("  Code interpreter:  {}", enabled(config.code_interpreter.id.as_deref()));
    println!("  Browser:           {}", enabled(config.browser.id.as_deref()));
    println!(
        "  Memory:            {}",
        if config.memory_enabled() {
            enabled(config.memory.id.as_deref())
        } else {
            "disabled (stateless)"
        }
    );
    println!(
        "  Search gateway:    {}",
        if config.gateway_configured() {
            enabled(config.gateway.url.as_deref())
        } else {
            "(not configured, web_search will report a configuration error)"
        }
    );
    println!("  Server:            {}:{}", config.server.host, config.server.port);
    println!("  Invocation limit:  {}s", config.timeouts.invocation_secs);

    println!();
    println!("Effective configuration:");
    println!("{}", config.to_toml());
}
