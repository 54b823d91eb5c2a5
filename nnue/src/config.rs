use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::encoding::{MAX_ACTIVE_FEATURES, NUM_FEATURES};
use crate::error::ConfigError;
use crate::network::{IntWidth, LayerSpec, QuantSpec};

pub const SCRELU: &str = "bucketed-screlu";
pub const CRELU: &str = "bucketed-crelu";

/// Feature transformer -> SCReLU -> output.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScreluConfig {
    pub hidden_size: usize,
    /// Activation (and feature transformer) quantization scale.
    pub qa: i64,
    /// Output layer weight scale.
    pub qb: i64,
    pub output_scale: i64,
    pub wdl_scale: f32,
}

/// Feature transformer -> CReLU -> hidden CReLU layers -> output.
/// Hidden weights are 8-bit, so `qb` must be a power of two: the integer
/// evaluators rescale between layers with `>> log2(qb)`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CreluConfig {
    pub hidden_size: usize,
    pub hidden_layers: Vec<usize>,
    pub qa: i64,
    pub qb: i64,
    pub output_scale: i64,
    pub wdl_scale: f32,
}

impl Default for ScreluConfig {
    fn default() -> Self {
        Self {
            hidden_size: 128,
            qa: 255,
            qb: 64,
            output_scale: 400,
            wdl_scale: 400.0,
        }
    }
}

impl Default for CreluConfig {
    fn default() -> Self {
        Self {
            hidden_size: 128,
            hidden_layers: vec![16],
            qa: 127,
            qb: 64,
            output_scale: 400,
            wdl_scale: 400.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelConfig {
    Screlu(ScreluConfig),
    Crelu(CreluConfig),
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;

        let architecture = match table.remove("architecture") {
            Some(toml::Value::String(name)) => name,
            Some(other) => {
                return Err(ConfigError::InvalidField {
                    field: "architecture",
                    reason: format!("expected a string, found {}", other.type_str()),
                })
            }
            None => return Err(ConfigError::MissingArchitecture),
        };

        let fields = toml::Value::Table(table);
        let config = match architecture.as_str() {
            SCRELU => ModelConfig::Screlu(parse_fields(fields)?),
            CRELU => ModelConfig::Crelu(parse_fields(fields)?),
            _ => return Err(ConfigError::UnknownArchitecture(architecture)),
        };

        config.validate()?;
        Ok(config)
    }

    /// Writes the config in the format [`ModelConfig::from_toml`] reads.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let fields = match self {
            ModelConfig::Screlu(c) => toml::Value::try_from(c),
            ModelConfig::Crelu(c) => toml::Value::try_from(c),
        }
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
        let toml::Value::Table(fields) = fields else {
            return Err(ConfigError::Parse("config is not a table".to_string()));
        };

        let mut table = toml::Table::new();
        table.insert(
            "architecture".to_string(),
            toml::Value::String(self.architecture().to_string()),
        );
        table.extend(fields);
        toml::to_string(&table).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn architecture(&self) -> &'static str {
        match self {
            ModelConfig::Screlu(_) => SCRELU,
            ModelConfig::Crelu(_) => CRELU,
        }
    }

    pub fn hidden_size(&self) -> usize {
        match self {
            ModelConfig::Screlu(c) => c.hidden_size,
            ModelConfig::Crelu(c) => c.hidden_size,
        }
    }

    pub fn qa(&self) -> i64 {
        match self {
            ModelConfig::Screlu(c) => c.qa,
            ModelConfig::Crelu(c) => c.qa,
        }
    }

    pub fn qb(&self) -> i64 {
        match self {
            ModelConfig::Screlu(c) => c.qb,
            ModelConfig::Crelu(c) => c.qb,
        }
    }

    /// Multiplier from the last layer's output to the reported score.
    pub fn output_scale(&self) -> i64 {
        match self {
            ModelConfig::Screlu(c) => c.output_scale,
            ModelConfig::Crelu(c) => c.output_scale,
        }
    }

    /// Divisor mapping a score onto the win-probability sigmoid.
    pub fn wdl_scale(&self) -> f32 {
        match self {
            ModelConfig::Screlu(c) => c.wdl_scale,
            ModelConfig::Crelu(c) => c.wdl_scale,
        }
    }

    /// Layers in export order, with their quantization contract.
    pub fn layer_specs(&self) -> Vec<LayerSpec> {
        match self {
            ModelConfig::Screlu(c) => screlu_specs(c),
            ModelConfig::Crelu(c) => crelu_specs(c),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        positive("hidden_size", self.hidden_size() as i64)?;
        positive("qa", self.qa())?;
        positive("qb", self.qb())?;
        positive("output_scale", self.output_scale())?;

        let wdl_scale = self.wdl_scale();
        if !(wdl_scale.is_finite() && wdl_scale > 0.0) {
            return Err(ConfigError::InvalidField {
                field: "wdl_scale",
                reason: format!("must be a positive number, got {}", wdl_scale),
            });
        }

        // Accumulators are clamped to [0, qa] before they feed the next layer
        if self.qa() > i16::MAX as i64 {
            return Err(ConfigError::InvalidField {
                field: "qa",
                reason: format!("must fit in i16, got {}", self.qa()),
            });
        }

        if let ModelConfig::Crelu(c) = self {
            if !(c.qb as u64).is_power_of_two() {
                return Err(ConfigError::InvalidField {
                    field: "qb",
                    reason: format!("must be a power of two, got {}", c.qb),
                });
            }
            if let Some(pos) = c.hidden_layers.iter().position(|&size| size == 0) {
                return Err(ConfigError::InvalidField {
                    field: "hidden_layers",
                    reason: format!("layer {} has size 0", pos),
                });
            }
        }

        for spec in self.layer_specs() {
            spec.check_headroom()?;
        }

        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::Screlu(ScreluConfig::default())
    }
}

fn parse_fields<T: serde::de::DeserializeOwned>(fields: toml::Value) -> Result<T, ConfigError> {
    fields
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
}

fn positive(field: &'static str, value: i64) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidField {
            field,
            reason: format!("must be positive, got {}", value),
        });
    }
    Ok(())
}

fn feature_transformer(hidden_size: usize, qa: i64) -> LayerSpec {
    LayerSpec {
        name: "ft".to_string(),
        input_dim: NUM_FEATURES,
        output_dim: hidden_size,
        weight: QuantSpec::new(IntWidth::I16, qa),
        bias: QuantSpec::new(IntWidth::I16, qa),
        transpose: true,
        clamped: false,
        active_inputs: MAX_ACTIVE_FEATURES,
        input_max: 1,
        input_scale: 1,
        bias_multiplier: 1,
        accumulator_bits: 32,
    }
}

fn screlu_specs(c: &ScreluConfig) -> Vec<LayerSpec> {
    let input_dim = 2 * c.hidden_size;
    vec![
        feature_transformer(c.hidden_size, c.qa),
        LayerSpec {
            name: "out".to_string(),
            input_dim,
            output_dim: 1,
            weight: QuantSpec::new(IntWidth::I16, c.qb),
            bias: QuantSpec::new(IntWidth::I16, c.qa * c.qb),
            transpose: false,
            clamped: true,
            active_inputs: input_dim,
            // Squared activations carry qa twice, the bias is lifted by qa once
            input_max: c.qa * c.qa,
            input_scale: c.qa * c.qa,
            bias_multiplier: c.qa,
            accumulator_bits: 64,
        },
    ]
}

fn crelu_specs(c: &CreluConfig) -> Vec<LayerSpec> {
    let mut specs = vec![feature_transformer(c.hidden_size, c.qa)];

    let mut input_dim = 2 * c.hidden_size;
    let outputs = c.hidden_layers.iter().copied().chain(std::iter::once(1));
    let count = c.hidden_layers.len();

    for (i, output_dim) in outputs.enumerate() {
        let name = if i == count {
            "out".to_string()
        } else {
            format!("l{}", i + 1)
        };
        specs.push(LayerSpec {
            name,
            input_dim,
            output_dim,
            weight: QuantSpec::new(IntWidth::I8, c.qb),
            bias: QuantSpec::new(IntWidth::I32, c.qa * c.qb),
            transpose: false,
            clamped: true,
            active_inputs: input_dim,
            input_max: c.qa,
            input_scale: c.qa,
            bias_multiplier: 1,
            accumulator_bits: 64,
        });
        input_dim = output_dim;
    }

    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRELU_TOML: &str = r#"
architecture = "bucketed-screlu"
hidden_size = 64
qa = 255
qb = 64
output_scale = 400
wdl_scale = 410.0
"#;

    const CRELU_TOML: &str = r#"
architecture = "bucketed-crelu"
hidden_size = 32
hidden_layers = [16, 8]
qa = 127
qb = 64
output_scale = 400
wdl_scale = 400.0
"#;

    #[test]
    fn test_parses_screlu() {
        let config = ModelConfig::from_toml(SCRELU_TOML).unwrap();
        assert_eq!(
            config,
            ModelConfig::Screlu(ScreluConfig {
                hidden_size: 64,
                qa: 255,
                qb: 64,
                output_scale: 400,
                wdl_scale: 410.0,
            })
        );
        assert_eq!(config.architecture(), SCRELU);
    }

    #[test]
    fn test_crelu_layer_specs() {
        let config = ModelConfig::from_toml(CRELU_TOML).unwrap();
        let specs = config.layer_specs();

        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["ft", "l1", "l2", "out"]);

        let dims: Vec<(usize, usize)> = specs.iter().map(|s| (s.input_dim, s.output_dim)).collect();
        assert_eq!(dims, [(NUM_FEATURES, 32), (64, 16), (16, 8), (8, 1)]);

        assert!(specs[0].transpose && !specs[0].clamped);
        assert!(specs[1..].iter().all(|s| s.clamped && !s.transpose));
    }

    #[test]
    fn test_crelu_without_hidden_layers() {
        let text = CRELU_TOML.replace("[16, 8]", "[]");
        let config = ModelConfig::from_toml(&text).unwrap();
        assert_eq!(config.layer_specs().len(), 2);
    }

    #[test]
    fn test_missing_architecture() {
        let text = SCRELU_TOML.replace("architecture = \"bucketed-screlu\"", "");
        assert!(matches!(
            ModelConfig::from_toml(&text),
            Err(ConfigError::MissingArchitecture)
        ));
    }

    #[test]
    fn test_unknown_architecture() {
        let text = SCRELU_TOML.replace("bucketed-screlu", "halfkp");
        assert!(matches!(
            ModelConfig::from_toml(&text),
            Err(ConfigError::UnknownArchitecture(name)) if name == "halfkp"
        ));
    }

    #[test]
    fn test_missing_and_unknown_keys() {
        let missing = SCRELU_TOML.replace("qb = 64", "");
        let err = ModelConfig::from_toml(&missing).unwrap_err();
        assert!(err.to_string().contains("qb"), "{}", err);

        let unknown = format!("{}\nlearning_rate = 0.1\n", SCRELU_TOML);
        let err = ModelConfig::from_toml(&unknown).unwrap_err();
        assert!(err.to_string().contains("learning_rate"), "{}", err);
    }

    #[test]
    fn test_invalid_values_name_the_field() {
        let zero = SCRELU_TOML.replace("hidden_size = 64", "hidden_size = 0");
        assert!(matches!(
            ModelConfig::from_toml(&zero),
            Err(ConfigError::InvalidField { field: "hidden_size", .. })
        ));

        let not_pow2 = CRELU_TOML.replace("qb = 64", "qb = 60");
        assert!(matches!(
            ModelConfig::from_toml(&not_pow2),
            Err(ConfigError::InvalidField { field: "qb", .. })
        ));

        let bad_wdl = SCRELU_TOML.replace("410.0", "-1.0");
        assert!(matches!(
            ModelConfig::from_toml(&bad_wdl),
            Err(ConfigError::InvalidField { field: "wdl_scale", .. })
        ));
    }

    #[test]
    fn test_headroom_violation_is_rejected() {
        // An i8 weight cannot hold a scale of 256
        let text = CRELU_TOML.replace("qb = 64", "qb = 256");
        assert!(matches!(
            ModelConfig::from_toml(&text),
            Err(ConfigError::Headroom { .. })
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let crelu = ModelConfig::Crelu(CreluConfig {
            hidden_layers: vec![32, 8],
            ..CreluConfig::default()
        });
        for config in [ModelConfig::default(), crelu] {
            let text = config.to_toml().unwrap();
            assert_eq!(ModelConfig::from_toml(&text).unwrap(), config);
        }
    }

    #[test]
    fn test_shipped_configs_are_valid() {
        let screlu = ModelConfig::from_toml(include_str!("../model.toml")).unwrap();
        assert_eq!(screlu, ModelConfig::default());

        let crelu = ModelConfig::from_toml(include_str!("../model-crelu.toml")).unwrap();
        assert_eq!(crelu.layer_specs().len(), 4);
    }

    #[test]
    fn test_defaults_pass_validation() {
        for config in [
            ModelConfig::Screlu(ScreluConfig::default()),
            ModelConfig::Crelu(CreluConfig::default()),
        ] {
            assert!(config.validate().is_ok());
        }
    }
}
