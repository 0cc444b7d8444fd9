//! Order dispatch.
//!
//! Every top-level call is one guarded `give-order` region, however many
//! units it addresses. Units are authorized one by one; a unit the caller
//! may not command, or one that died during the batch, is skipped and does
//! not count as ordered.

use std::rc::Rc;

use crate::auth::CallerContext;
use crate::components::{Command, UnitId};
use crate::error::Result;
use crate::guard::RecursionCategory;

use super::SyncedGateway;

/// Commands to hand out in one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Orders {
    /// The same command to every unit.
    One(Command),
    /// The same command list to every unit.
    Many(Vec<Command>),
    /// Command `i` to unit `i`, truncated to the shorter list.
    Pairwise(Vec<Command>),
}

impl SyncedGateway {
    /// Append a command to one unit's queue.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit;
    /// [`GatewayError::RecursionLimitExceeded`](crate::error::GatewayError::RecursionLimitExceeded)
    /// when nested too deeply.
    pub fn give_order_to_unit(&mut self, ctx: &CallerContext, unit: UnitId, command: Command) -> Result<()> {
        const VERB: &str = "GiveOrderToUnit";
        let _token = self.guard.enter(VERB, RecursionCategory::GiveOrder)?;
        self.controlled_unit(ctx, VERB, unit)?;
        self.append_command(unit, command);
        Ok(())
    }

    /// Hand `orders` to `units` in order, returning how many units were
    /// ordered. `verb` names the calling verb in errors.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RecursionLimitExceeded`](crate::error::GatewayError::RecursionLimitExceeded)
    /// when nested too deeply. Per-unit denials are not errors.
    pub fn give_orders(
        &mut self,
        ctx: &CallerContext,
        verb: &'static str,
        units: &[UnitId],
        orders: &Orders,
    ) -> Result<usize> {
        let _token = self.guard.enter(verb, RecursionCategory::GiveOrder)?;
        let mut ordered = 0;
        match orders {
            Orders::One(command) => {
                for &unit in units {
                    if self.controlled_unit(ctx, verb, unit).is_ok() {
                        self.append_command(unit, command.clone());
                        ordered += 1;
                    }
                }
            }
            Orders::Many(commands) => {
                for &unit in units {
                    if self.controlled_unit(ctx, verb, unit).is_err() {
                        continue;
                    }
                    for command in commands {
                        // A callin may kill the unit part way through its list
                        if self.registry.unit(unit).is_none() {
                            break;
                        }
                        self.append_command(unit, command.clone());
                    }
                    ordered += 1;
                }
            }
            Orders::Pairwise(commands) => {
                for (&unit, command) in units.iter().zip(commands) {
                    if self.controlled_unit(ctx, verb, unit).is_ok() {
                        self.append_command(unit, command.clone());
                        ordered += 1;
                    }
                }
            }
        }
        tracing::trace!(units = units.len(), ordered, "orders dispatched");
        Ok(ordered)
    }

    fn append_command(&mut self, unit: UnitId, command: Command) {
        self.sync.assert_synced("GiveOrder", &(unit, &command));
        let Some(entry) = self.registry.unit_mut(unit) else {
            return;
        };
        entry.commands.push(command.clone());
        let callins = Rc::clone(&self.callins);
        callins.unit_command(self, unit, &command);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::components::Unit;
    use crate::config::GatewayConfig;
    use crate::defs::{DefRegistry, UnitDef};
    use crate::error::GatewayError;
    use crate::gateway::UnitDeath;
    use crate::ledger::TeamLedger;
    use crate::math::Fixed;
    use crate::registry::EntityRegistry;
    use crate::services::SyncedCallins;
    use crate::terrain::HeightMap;

    fn gateway(units: &[(UnitId, u32)]) -> SyncedGateway {
        let mut registry = EntityRegistry::new(2);
        registry.add_team(0, TeamLedger::default(), false);
        registry.add_team(1, TeamLedger::default(), false);
        let def: UnitDef = ron::from_str(r#"(name: "grunt", max_health: 10)"#).unwrap();
        for &(id, team) in units {
            registry.unit_ids.allocate(Some(id));
            registry.units.insert(id, Unit::from_def(id, 1, &def, team, team, 2));
        }
        SyncedGateway::new(
            GatewayConfig::default(),
            DefRegistry::default(),
            registry,
            HeightMap::flat(4, 4, 8, Fixed::ZERO),
        )
    }

    fn queue(gateway: &SyncedGateway, unit: UnitId) -> Vec<i32> {
        gateway.registry().units[&unit]
            .commands
            .commands
            .iter()
            .map(|command| command.id)
            .collect()
    }

    #[test]
    fn test_pairwise_truncates() {
        let mut gateway = gateway(&[(1, 0), (2, 0), (3, 0)]);
        let orders = Orders::Pairwise(vec![Command::new(10, vec![]), Command::new(20, vec![])]);
        let count = gateway
            .give_orders(&CallerContext::full(), "GiveOrderArrayToUnitArray", &[1, 2, 3], &orders)
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(queue(&gateway, 1), vec![10]);
        assert_eq!(queue(&gateway, 2), vec![20]);
        assert!(queue(&gateway, 3).is_empty());
    }

    #[test]
    fn test_denied_units_are_skipped() {
        let mut gateway = gateway(&[(1, 0), (2, 1), (3, 0)]);
        let orders = Orders::Many(vec![Command::new(10, vec![]), Command::new(11, vec![])]);
        let count = gateway
            .give_orders(&CallerContext::team(0), "GiveOrderArrayToUnitArray", &[1, 2, 3, 99], &orders)
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(queue(&gateway, 3), vec![10, 11]);
        assert!(queue(&gateway, 2).is_empty());
    }

    #[test]
    fn test_single_order_errors_are_silent() {
        let mut gateway = gateway(&[(1, 1)]);
        let err = gateway
            .give_order_to_unit(&CallerContext::team(0), 1, Command::new(5, vec![]))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(queue(&gateway, 1).is_empty());
    }

    /// Orders every unit it hears about again, forever.
    struct Echo {
        depth_seen: Cell<u32>,
        last_error: Cell<Option<bool>>,
    }

    impl SyncedCallins for Echo {
        fn unit_command(&self, gateway: &mut SyncedGateway, unit: UnitId, command: &Command) {
            self.depth_seen
                .set(self.depth_seen.get().max(gateway.guard().depth(RecursionCategory::GiveOrder)));
            let result = gateway.give_order_to_unit(&CallerContext::full(), unit, command.clone());
            if let Err(err) = result {
                self.last_error
                    .set(Some(matches!(err, GatewayError::RecursionLimitExceeded { .. })));
            }
        }
    }

    #[test]
    fn test_recursive_orders_hit_the_limit() {
        let echo = Rc::new(Echo {
            depth_seen: Cell::new(0),
            last_error: Cell::new(None),
        });
        let mut gateway = gateway(&[(1, 0)]).with_callins(echo.clone());
        gateway
            .give_order_to_unit(&CallerContext::full(), 1, Command::new(1, vec![]))
            .unwrap();
        assert_eq!(echo.depth_seen.get(), 16);
        assert_eq!(echo.last_error.get(), Some(true));
        assert_eq!(gateway.guard().depth(RecursionCategory::GiveOrder), 0);
        assert_eq!(queue(&gateway, 1).len(), 16);
    }

    /// Re-dispatches every order it hears about through the unit-map verb.
    #[derive(Default)]
    struct MapEcho {
        failed_verb: Cell<Option<&'static str>>,
    }

    impl SyncedCallins for MapEcho {
        fn unit_command(&self, gateway: &mut SyncedGateway, unit: UnitId, command: &Command) {
            let orders = Orders::One(command.clone());
            if let Err(err) = gateway.give_orders(&CallerContext::full(), "GiveOrderToUnitMap", &[unit], &orders) {
                self.failed_verb.set(Some(err.verb()));
            }
        }
    }

    #[test]
    fn test_batch_recursion_error_names_the_calling_verb() {
        let echo = Rc::new(MapEcho::default());
        let mut gateway = gateway(&[(1, 0)]).with_callins(echo.clone());
        let orders = Orders::One(Command::new(1, vec![]));
        gateway
            .give_orders(&CallerContext::full(), "GiveOrderToUnitMap", &[1], &orders)
            .unwrap();
        assert_eq!(echo.failed_verb.get(), Some("GiveOrderToUnitMap"));
        assert_eq!(gateway.guard().depth(RecursionCategory::GiveOrder), 0);
    }

    /// Destroys the unit as soon as it gets its first order.
    struct Saboteur;

    impl SyncedCallins for Saboteur {
        fn unit_command(&self, gateway: &mut SyncedGateway, unit: UnitId, _command: &Command) {
            let _ = gateway.destroy_unit(&CallerContext::full(), unit, UnitDeath::default());
        }
    }

    #[test]
    fn test_unit_killed_mid_batch() {
        let mut gateway = gateway(&[(1, 0), (2, 0)]).with_callins(Rc::new(Saboteur));
        let orders = Orders::Many(vec![Command::new(10, vec![]), Command::new(11, vec![])]);
        let count = gateway
            .give_orders(&CallerContext::full(), "GiveOrderArrayToUnit", &[1, 2], &orders)
            .unwrap();
        assert_eq!(count, 2);
        assert!(gateway.registry().units.is_empty());
    }
}
