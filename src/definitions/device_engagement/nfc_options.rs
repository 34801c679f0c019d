use std::collections::BTreeMap;

use ciborium::Value;

use crate::definitions::device_engagement::error::Error;

/// The maximum length of the NFC command, as specified in ISO_18013-5 2021 Section 8.3.3.1.2
/// Values of this type must lie between 255 and 65,535 inclusive, as specified in Note 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandDataLength(u16);

/// The maximum length of the NFC response data, as specified in ISO_18013-5 2021 Section 8.3.3.1.2
/// Values of this type must lie between 256 and 65,536 inclusive, as specified in Note 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseDataLength(u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NfcOptions {
    pub max_len_command_data_field: CommandDataLength,
    pub max_len_response_data_field: ResponseDataLength,
}

impl Default for NfcOptions {
    fn default() -> Self {
        Self {
            max_len_command_data_field: CommandDataLength::MAX,
            max_len_response_data_field: ResponseDataLength::MAX,
        }
    }
}

impl CommandDataLength {
    pub const MIN: CommandDataLength = CommandDataLength(255);
    pub const MAX: CommandDataLength = CommandDataLength(65535);

    pub fn new(v: u64) -> Result<CommandDataLength, Error> {
        match u16::try_from(v) {
            Ok(v) if v >= Self::MIN.0 => Ok(CommandDataLength(v)),
            _ => Err(Error::InvalidNfcCommandDataLengthError),
        }
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl ResponseDataLength {
    pub const MIN: ResponseDataLength = ResponseDataLength(256);
    pub const MAX: ResponseDataLength = ResponseDataLength(65536);

    pub fn new(v: u64) -> Result<ResponseDataLength, Error> {
        if v >= Self::MIN.0 as u64 && v <= Self::MAX.0 as u64 {
            Ok(ResponseDataLength(v as u32))
        } else {
            Err(Error::InvalidNfcResponseDataLengthError)
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<Value> for NfcOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Map(entries) = v else {
            return Err(Error::InvalidNfcOptions);
        };
        let map: BTreeMap<i128, Value> = entries
            .into_iter()
            .map(|(k, v)| {
                let k = k.into_integer().map_err(|_| Error::InvalidNfcOptions)?.into();
                Ok((k, v))
            })
            .collect::<Result<_, Error>>()?;

        let lookup = |idx: i128| -> Result<u64, Error> {
            match map.get(&idx) {
                Some(Value::Integer(i)) => u64::try_from(*i).map_err(|_| Error::InvalidNfcOptions),
                _ => Err(Error::InvalidNfcOptions),
            }
        };

        Ok(NfcOptions {
            max_len_command_data_field: CommandDataLength::new(lookup(0)?)?,
            max_len_response_data_field: ResponseDataLength::new(lookup(1)?)?,
        })
    }
}

impl From<NfcOptions> for Value {
    fn from(o: NfcOptions) -> Value {
        Value::Map(vec![
            (
                Value::Integer(0.into()),
                Value::Integer(o.max_len_command_data_field.get().into()),
            ),
            (
                Value::Integer(1.into()),
                Value::Integer(o.max_len_response_data_field.get().into()),
            ),
        ])
    }
}
