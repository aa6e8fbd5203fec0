use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::types::{ApiKey, LoadBalanceStrategy};

/// 在同一渠道的 active 密钥中选一个。轮询游标按渠道 id 保存在进程内，
/// 重启即丢失；密钥列表变更后游标按新长度取模（软均衡，不保证严格轮转）。
pub struct LoadBalancer {
    round_robin_cursors: Mutex<HashMap<String, usize>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            round_robin_cursors: Mutex::new(HashMap::new()),
        }
    }

    /// 输入假定已过滤为 status=active；空输入返回 None，由调用方映射为 503
    pub fn select(
        &self,
        keys: &[ApiKey],
        strategy: LoadBalanceStrategy,
        channel_id: &str,
    ) -> Option<ApiKey> {
        if keys.is_empty() {
            return None;
        }

        let index = match strategy {
            LoadBalanceStrategy::RoundRobin => self.next_round_robin(channel_id, keys.len()),
            LoadBalanceStrategy::Weighted => weighted_index(keys),
            LoadBalanceStrategy::Priority => priority_index(keys),
            LoadBalanceStrategy::LeastUsed => least_used_index(keys),
        };

        keys.get(index).cloned()
    }

    fn next_round_robin(&self, channel_id: &str, n: usize) -> usize {
        let mut cursors = self
            .round_robin_cursors
            .lock()
            .expect("round-robin cursor map poisoned");
        let cursor = cursors.entry(channel_id.to_string()).or_insert(0);
        let index = *cursor % n;
        *cursor = (*cursor + 1) % n;
        index
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

/// weight/Σweight 抽样；权重和为 0 时退化为均匀
fn weighted_index(keys: &[ApiKey]) -> usize {
    let total: i64 = keys.iter().map(|k| k.weight.max(0)).sum();
    let mut rng = rand::rng();
    if total <= 0 {
        return rng.random_range(0..keys.len());
    }
    let mut remaining = rng.random_range(0..total);
    for (i, key) in keys.iter().enumerate() {
        let weight = key.weight.max(0);
        if remaining < weight {
            return i;
        }
        remaining -= weight;
    }
    keys.len() - 1
}

/// 最高 priority 胜出；平局先比 errorCount 低者，再按原始顺序
fn priority_index(keys: &[ApiKey]) -> usize {
    let mut best = 0;
    for (i, key) in keys.iter().enumerate().skip(1) {
        let current = &keys[best];
        if key.priority > current.priority
            || (key.priority == current.priority && key.error_count < current.error_count)
        {
            best = i;
        }
    }
    best
}

fn least_used_index(keys: &[ApiKey]) -> usize {
    let mut best = 0;
    for (i, key) in keys.iter().enumerate().skip(1) {
        if key.total_requests < keys[best].total_requests {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{KeyStatus, now_ms};

    fn key(id: &str, priority: i64, weight: i64, errors: i64, requests: i64) -> ApiKey {
        let now = now_ms();
        ApiKey {
            id: id.to_string(),
            channel_id: "c1".to_string(),
            key: format!("sk-{}", id),
            alias: None,
            status: KeyStatus::Active,
            priority,
            weight,
            balance: None,
            last_checked: None,
            last_used: None,
            error_count: errors,
            total_requests: requests,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn empty_input_yields_none() {
        let balancer = LoadBalancer::new();
        assert!(
            balancer
                .select(&[], LoadBalanceStrategy::RoundRobin, "c1")
                .is_none()
        );
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let balancer = LoadBalancer::new();
        let keys = vec![
            key("a", 50, 50, 0, 0),
            key("b", 50, 50, 0, 0),
            key("c", 50, 50, 0, 0),
        ];
        let picked: Vec<String> = (0..6)
            .map(|_| {
                balancer
                    .select(&keys, LoadBalanceStrategy::RoundRobin, "c1")
                    .unwrap()
                    .id
            })
            .collect();
        assert_eq!(picked, ["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn round_robin_cursor_is_per_channel() {
        let balancer = LoadBalancer::new();
        let keys = vec![key("a", 50, 50, 0, 0), key("b", 50, 50, 0, 0)];
        assert_eq!(
            balancer
                .select(&keys, LoadBalanceStrategy::RoundRobin, "c1")
                .unwrap()
                .id,
            "a"
        );
        // 另一渠道独立从 0 开始
        assert_eq!(
            balancer
                .select(&keys, LoadBalanceStrategy::RoundRobin, "c2")
                .unwrap()
                .id,
            "a"
        );
    }

    #[test]
    fn round_robin_survives_key_list_shrink() {
        let balancer = LoadBalancer::new();
        let three = vec![
            key("a", 50, 50, 0, 0),
            key("b", 50, 50, 0, 0),
            key("c", 50, 50, 0, 0),
        ];
        balancer.select(&three, LoadBalanceStrategy::RoundRobin, "c1");
        balancer.select(&three, LoadBalanceStrategy::RoundRobin, "c1");
        // 缩减到 2 个后游标按新长度取模，不会越界
        let two = vec![key("a", 50, 50, 0, 0), key("b", 50, 50, 0, 0)];
        assert!(
            balancer
                .select(&two, LoadBalanceStrategy::RoundRobin, "c1")
                .is_some()
        );
    }

    #[test]
    fn weighted_skews_towards_heavy_key() {
        let balancer = LoadBalancer::new();
        let keys = vec![
            key("light", 50, 1, 0, 0),
            key("light2", 50, 1, 0, 0),
            key("heavy", 50, 2, 0, 0),
        ];
        let mut counts: HashMap<String, usize> = HashMap::new();
        let draws = 4000;
        for _ in 0..draws {
            let picked = balancer
                .select(&keys, LoadBalanceStrategy::Weighted, "c1")
                .unwrap();
            *counts.entry(picked.id).or_insert(0) += 1;
        }
        let heavy = counts["heavy"] as f64 / draws as f64;
        assert!((heavy - 0.5).abs() < 0.05, "heavy share was {}", heavy);
        let light = counts["light"] as f64 / draws as f64;
        assert!((light - 0.25).abs() < 0.05, "light share was {}", light);
    }

    #[test]
    fn weighted_zero_sum_degrades_to_uniform() {
        let balancer = LoadBalancer::new();
        let keys = vec![key("a", 50, 0, 0, 0), key("b", 50, 0, 0, 0)];
        for _ in 0..50 {
            assert!(
                balancer
                    .select(&keys, LoadBalanceStrategy::Weighted, "c1")
                    .is_some()
            );
        }
    }

    #[test]
    fn priority_breaks_ties_by_error_count_then_order() {
        let balancer = LoadBalancer::new();
        let keys = vec![
            key("k1", 80, 50, 3, 0),
            key("k2", 80, 50, 0, 0),
            key("k3", 60, 50, 0, 0),
        ];
        assert_eq!(
            balancer
                .select(&keys, LoadBalanceStrategy::Priority, "c1")
                .unwrap()
                .id,
            "k2"
        );

        // 完全平局时保持原始顺序
        let tied = vec![key("first", 70, 50, 1, 0), key("second", 70, 50, 1, 0)];
        assert_eq!(
            balancer
                .select(&tied, LoadBalanceStrategy::Priority, "c1")
                .unwrap()
                .id,
            "first"
        );
    }

    #[test]
    fn least_used_prefers_lowest_total_requests() {
        let balancer = LoadBalancer::new();
        let keys = vec![
            key("busy", 50, 50, 0, 120),
            key("idle", 50, 50, 0, 7),
            key("mid", 50, 50, 0, 30),
        ];
        assert_eq!(
            balancer
                .select(&keys, LoadBalanceStrategy::LeastUsed, "c1")
                .unwrap()
                .id,
            "idle"
        );
    }
}
