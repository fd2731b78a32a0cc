//! Rule installation helpers and the switch-connect handler

use super::dispatcher::Event;
use super::{Datapath, GatewayState};
use crate::Result;
use crate::openflow::{Action, FlowMatch, FlowRule};
use tracing::debug;

/// Catch-all rule that sends unmatched frames to the controller
pub const TABLE_MISS_PRIORITY: u16 = 0;

/// Learned (in_port, eth_dst) shortcut
pub const UNICAST_PRIORITY: u16 = 1;

/// Add a rule to the switch's table 0.
///
/// With `buffer_id`, the switch also releases that buffered frame through
/// the new rule.
pub fn install_rule(
    datapath: &mut dyn Datapath,
    priority: u16,
    flow_match: FlowMatch,
    actions: Vec<Action>,
    buffer_id: Option<u32>,
) {
    debug!(
        datapath = %datapath.id(),
        priority,
        ?flow_match,
        ?buffer_id,
        "installing flow"
    );
    datapath.install_rule(FlowRule::new(priority, flow_match, actions).with_buffer(buffer_id));
}

/// Send every unmatched frame to the controller, unbuffered
pub fn install_table_miss(datapath: &mut dyn Datapath) {
    install_rule(
        datapath,
        TABLE_MISS_PRIORITY,
        FlowMatch::any(),
        vec![Action::to_controller()],
        None,
    );
}

/// Handler for a newly described switch
pub fn on_switch_features(
    _state: &mut GatewayState,
    datapath: &mut dyn Datapath,
    _event: &Event<'_>,
) -> Result<()> {
    install_table_miss(datapath);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::RecordingDatapath;
    use crate::openflow::{DatapathId, port};

    #[test]
    fn test_table_miss_rule() {
        let mut dp = RecordingDatapath::new(DatapathId(1));
        install_table_miss(&mut dp);

        assert_eq!(dp.rules.len(), 1);
        let rule = &dp.rules[0];
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.flow_match, FlowMatch::any());
        assert_eq!(rule.buffer_id, None);
        assert_eq!(
            rule.actions,
            vec![Action::Output {
                port: port::CONTROLLER,
                max_len: 0xffff
            }]
        );
        assert!(dp.sent.is_empty());
    }

    #[test]
    fn test_switch_features_handler_installs_table_miss() {
        let mut state = GatewayState::default();
        let mut dp = RecordingDatapath::new(DatapathId(7));

        on_switch_features(&mut state, &mut dp, &Event::SwitchFeatures).unwrap();

        assert_eq!(dp.rules.len(), 1);
        assert_eq!(dp.rules[0].priority, TABLE_MISS_PRIORITY);
    }

    #[test]
    fn test_install_rule_passes_buffer() {
        let mut dp = RecordingDatapath::new(DatapathId(1));
        install_rule(
            &mut dp,
            UNICAST_PRIORITY,
            FlowMatch::any().in_port(1),
            vec![Action::output(2)],
            Some(5),
        );
        assert_eq!(dp.rules[0].buffer_id, Some(5));
    }
}
