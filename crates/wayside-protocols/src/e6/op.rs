// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Reader settings query.

use std::sync::Arc;

use async_trait::async_trait;

use wayside_core::{
    CleanupContext, CommMessage, CommResult, Device, DeviceState, Priority, Procedure, Transition,
};

use super::E6Codec;
use super::props::{AckProtocol, AckTimeoutProp, DataDetectProp, E6Property, RfProtocol};

/// One exchange of the settings query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsPhase {
    /// Query the acknowledge timeout of a host protocol.
    AckTimeout(AckProtocol),
    /// Query the data detect threshold of an RF protocol.
    DataDetect(RfProtocol),
}

impl SettingsPhase {
    fn next(self) -> Option<Self> {
        match self {
            Self::AckTimeout(p) => match p {
                AckProtocol::UdpIp => Some(Self::AckTimeout(AckProtocol::Serial)),
                AckProtocol::Serial => Some(Self::AckTimeout(AckProtocol::SerialDebug)),
                AckProtocol::SerialDebug => Some(Self::DataDetect(RfProtocol::SeGo)),
            },
            Self::DataDetect(p) => match p {
                RfProtocol::SeGo => Some(Self::DataDetect(RfProtocol::Iag)),
                RfProtocol::Iag => Some(Self::DataDetect(RfProtocol::SixC)),
                RfProtocol::SixC => None,
            },
        }
    }
}

/// Queries every acknowledge timeout and data detect threshold of a reader,
/// then publishes them as the reader's state.
#[derive(Debug)]
pub struct QueryReaderSettings {
    reader: Arc<Device>,
    ack_timeouts: Vec<(AckProtocol, u16)>,
    data_detect: Vec<(RfProtocol, u8)>,
}

impl QueryReaderSettings {
    /// Creates the query.
    pub fn new(reader: Arc<Device>) -> Self {
        Self {
            reader,
            ack_timeouts: Vec::new(),
            data_detect: Vec::new(),
        }
    }

    /// Returns the decoded acknowledge timeouts.
    pub fn ack_timeouts(&self) -> &[(AckProtocol, u16)] {
        &self.ack_timeouts
    }

    /// Returns the decoded data detect thresholds.
    pub fn data_detect(&self) -> &[(RfProtocol, u8)] {
        &self.data_detect
    }
}

#[async_trait]
impl Procedure for QueryReaderSettings {
    type Codec = E6Codec;
    type Phase = SettingsPhase;

    fn name(&self) -> &'static str {
        "query_reader_settings"
    }

    fn priority(&self) -> Priority {
        Priority::Diagnostic
    }

    fn params(&self) -> String {
        self.reader.id().to_string()
    }

    fn begin(&mut self) -> SettingsPhase {
        SettingsPhase::AckTimeout(AckProtocol::UdpIp)
    }

    async fn step(
        &mut self,
        phase: &mut SettingsPhase,
        mess: &mut CommMessage<'_, E6Codec>,
    ) -> CommResult<Transition<SettingsPhase>> {
        match *phase {
            SettingsPhase::AckTimeout(protocol) => {
                let mut prop = E6Property::from(AckTimeoutProp::new(protocol));
                mess.query(&mut prop).await?;
                if let E6Property::AckTimeout(p) = &prop {
                    tracing::debug!(reader = %self.reader.id(), "{}", p);
                    self.ack_timeouts.push((protocol, p.timeout_ms().unwrap_or_default()));
                }
            }
            SettingsPhase::DataDetect(protocol) => {
                let mut prop = E6Property::from(DataDetectProp::new(protocol));
                mess.query(&mut prop).await?;
                if let E6Property::DataDetect(p) = &prop {
                    tracing::debug!(reader = %self.reader.id(), "{}", p);
                    self.data_detect.push((protocol, p.value_db().unwrap_or_default()));
                }
            }
        }
        Ok(match phase.next() {
            Some(next) => Transition::Continue(next),
            None => Transition::Done,
        })
    }

    fn cleanup(&mut self, ctx: &mut CleanupContext<'_>) {
        if !ctx.is_success() {
            return;
        }
        let mut state = DeviceState::new();
        for (protocol, timeout) in &self.ack_timeouts {
            state.insert(format!("ack_timeout_{}_ms", protocol.as_str()), *timeout);
        }
        for (protocol, db) in &self.data_detect {
            state.insert(format!("data_detect_{}_db", protocol.as_str()), *db);
        }
        ctx.publish(&self.reader, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e6::encode_frame;
    use crate::testing::ScriptMessenger;
    use wayside_core::{Controller, Executable, Operation, OperationPolicy, Outcome, StepOutcome, Value};

    fn replies() -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for (ordinal, timeout) in [(0u8, 100u16), (1, 250), (2, 1000)] {
            let [hi, lo] = timeout.to_be_bytes();
            out.push(encode_frame(&[0x40, 0x00, 0x00, 0x19, ordinal, hi, lo]).unwrap());
        }
        for (ordinal, db) in [(0u8, 5u8), (1, 10), (2, 15)] {
            out.push(encode_frame(&[0x50, 0x00, 0x54, ordinal << 4, db, 0x00, 0x0D]).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_query_publishes_settings() {
        let reader = Arc::new(Device::new("r1", "tag_reader"));
        let controller = Arc::new(Controller::new("ctl", "line", 1));
        let mut op = Operation::new(QueryReaderSettings::new(reader.clone()), Arc::new(E6Codec), controller);
        op.begin(&OperationPolicy::default());

        let mut messenger = ScriptMessenger::new(replies());
        let outcome = loop {
            match op.step(&mut messenger).await {
                StepOutcome::Continue => {}
                StepOutcome::Finished(outcome) => break outcome,
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(op.steps(), 6);
        op.finish(outcome, None).unwrap();

        let state = reader.state();
        assert_eq!(state.get("ack_timeout_serial_ms"), Some(&Value::Int(250)));
        assert_eq!(state.get("data_detect_6c_db"), Some(&Value::Int(15)));
        assert_eq!(state.values().len(), 6);
    }
}
