use cucumber::given;
use fee_payment_engine::EngineConfig;

use crate::cucumber::{world::FeeSystem, FeeWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut FeeWorld) {
    world.system = Some(FeeSystem::new(EngineConfig::default()).await);
}

#[given("a fresh install without automatic credit application")]
async fn fresh_database_manual_credit(world: &mut FeeWorld) {
    let config = EngineConfig::default().with_auto_apply_credit(false);
    world.system = Some(FeeSystem::new(config).await);
}
