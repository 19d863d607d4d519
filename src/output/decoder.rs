use super::OutputError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// A single decoding step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMethod {
    Base64,
}

impl DecodeMethod {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "base64" => Some(DecodeMethod::Base64),
            _ => None,
        }
    }

    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, String> {
        match self {
            DecodeMethod::Base64 => STANDARD.decode(input).map_err(|e| e.to_string()),
        }
    }
}

/// Ordered chain of decoding steps applied to every value of a secret.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    methods: Vec<DecodeMethod>,
}

impl Decoder {
    pub fn new(names: &[String]) -> Result<Self, OutputError> {
        let methods = names
            .iter()
            .map(|name| DecodeMethod::parse(name).ok_or_else(|| OutputError::UnknownDecoder(name.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { methods })
    }

    /// Run `value` through every step in order.
    pub fn decode(&self, value: &str) -> Result<Vec<u8>, String> {
        self.methods
            .iter()
            .try_fold(value.as_bytes().to_vec(), |bytes, method| method.apply(&bytes))
    }
}
