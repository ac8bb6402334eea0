use log::{error, info};

use actor::{
    Actor, ActorConfig,
    env::{CartPole, Environment},
    policy::LinearPolicy,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = ActorConfig::from_env()?;
    info!(
        "starting {} environments on {} threads, horizon {}",
        config.num_envs, config.num_threads, config.horizon
    );

    let seed = config.seed.unwrap_or_else(rand::random);
    let envs = (0..config.num_envs as u64)
        .map(|i| {
            Box::new(CartPole::new(config.env_max_steps, seed.wrapping_add(i))) as Box<dyn Environment>
        })
        .collect();

    let policy = LinearPolicy::new(config.obs_dim, config.num_actions);
    let report = match Actor::new(config, policy, envs).run().await {
        Ok(report) => report,
        Err(e) => {
            error!("actor failed: {e}");
            return Err(e.into());
        }
    };

    if report.interrupted {
        info!("interrupted after {} steps", report.metrics.global_step);
    } else if report.metrics.queue_closed {
        info!("learner stopped consuming after {} steps", report.metrics.global_step);
    }

    Ok(())
}
