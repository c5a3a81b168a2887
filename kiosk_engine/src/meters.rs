use serde::{Deserialize, Serialize};

/// Bounds and baseline for the two session meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub temp_min: i32,
    pub temp_max: i32,
    pub money_min: i32,
    pub money_max: i32,
    pub base_temp: i32,
    pub base_money: i32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            temp_min: 15,
            temp_max: 32,
            money_min: 0,
            money_max: 5,
            base_temp: 22,
            base_money: 4,
        }
    }
}

impl MeterConfig {
    /// Returns a description of the first inconsistent bound, if any.
    pub fn check(&self) -> Result<(), String> {
        if self.temp_min >= self.temp_max {
            return Err(format!(
                "temp_min {} must be below temp_max {}",
                self.temp_min, self.temp_max
            ));
        }
        if self.money_min >= self.money_max {
            return Err(format!(
                "money_min {} must be below money_max {}",
                self.money_min, self.money_max
            ));
        }
        if !(self.temp_min..=self.temp_max).contains(&self.base_temp) {
            return Err(format!("base_temp {} is outside the temp range", self.base_temp));
        }
        if !(self.money_min..=self.money_max).contains(&self.base_money) {
            return Err(format!(
                "base_money {} is outside the money range",
                self.base_money
            ));
        }
        Ok(())
    }
}

/// Temperature (degrees) and money step carried across one visitor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Meters {
    pub temp: i32,
    pub money: i32,
}

impl Meters {
    pub fn baseline(config: &MeterConfig) -> Self {
        Self {
            temp: config.base_temp,
            money: config.base_money,
        }
    }

    /// Applies a node's deltas and clamps both meters into range.
    pub fn apply(self, config: &MeterConfig, temp_delta: i32, money_delta: i32) -> Self {
        Self {
            temp: self
                .temp
                .saturating_add(temp_delta)
                .clamp(config.temp_min, config.temp_max),
            money: self
                .money
                .saturating_add(money_delta)
                .clamp(config.money_min, config.money_max),
        }
    }

    /// Meter levels as the HUD displays them.
    pub fn percentages(&self, config: &MeterConfig) -> (u8, u8) {
        (temp_percent(config, self.temp), money_percent(config, self.money))
    }
}

fn temp_percent(config: &MeterConfig, temp: i32) -> u8 {
    let temp = temp.clamp(config.temp_min, config.temp_max);
    let span = (config.temp_max - config.temp_min) as f64;
    if span <= 0.0 {
        return 0;
    }
    let pct = (temp - config.temp_min) as f64 / span * 100.0;
    pct.round().clamp(0.0, 100.0) as u8
}

// The money gauge is scaled against its maximum step, not its span.
fn money_percent(config: &MeterConfig, step: i32) -> u8 {
    let step = step.clamp(config.money_min, config.money_max);
    if config.money_max <= 0 {
        return 0;
    }
    let pct = step as f64 / config.money_max as f64 * 100.0;
    pct.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_clamp_to_configured_range() {
        let config = MeterConfig::default();
        let meters = Meters::baseline(&config);
        let hot = meters.apply(&config, 40, 9);
        assert_eq!(hot, Meters { temp: 32, money: 5 });
        let cold = hot.apply(&config, -100, -100);
        assert_eq!(cold, Meters { temp: 15, money: 0 });
    }

    #[test]
    fn percentages_follow_installation_scale() {
        let config = MeterConfig::default();
        assert_eq!(Meters::baseline(&config).percentages(&config), (41, 80));
        assert_eq!(Meters { temp: 15, money: 0 }.percentages(&config), (0, 0));
        assert_eq!(Meters { temp: 32, money: 5 }.percentages(&config), (100, 100));
    }

    #[test]
    fn inconsistent_bounds_are_reported() {
        let config = MeterConfig {
            base_temp: 40,
            ..MeterConfig::default()
        };
        assert!(config.check().is_err());
        assert!(MeterConfig::default().check().is_ok());
    }
}
