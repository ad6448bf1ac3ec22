#![no_main]
use libfuzzer_sys::fuzz_target;
use vetune_core::{LoadAxis, TargetSource, TunerCfg};

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    let Ok(cfg) = toml::from_str::<vetune_config::Config>(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        // A validated config must also map onto runtime settings.
        let _ = TunerCfg::from_config(&cfg, TargetSource::Fixed(cfg.target.afr), LoadAxis::Load);
    }
});
