//! 学習/検証/テストへの分割

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::types::Split;

/// 分割比率（テストは残り）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.7,
            val: 0.15,
        }
    }
}

/// 各分割の件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitCounts {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl SplitCounts {
    pub fn total(&self) -> usize {
        self.train + self.val + self.test
    }

    pub fn get(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train,
            Split::Val => self.val,
            Split::Test => self.test,
        }
    }
}

/// 件数を計算（切り捨て。端数はすべてテストへ回る）
pub fn split_counts(n: usize, ratios: SplitRatios) -> SplitCounts {
    let train = ((n as f64 * ratios.train) as usize).min(n);
    let val = ((n as f64 * ratios.val) as usize).min(n - train);
    SplitCounts {
        train,
        val,
        test: n - train - val,
    }
}

/// 分割結果
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<T> {
    pub train: Vec<T>,
    pub val: Vec<T>,
    pub test: Vec<T>,
}

impl<T> Partition<T> {
    pub fn get(&self, split: Split) -> &[T] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn counts(&self) -> SplitCounts {
        SplitCounts {
            train: self.train.len(),
            val: self.val.len(),
            test: self.test.len(),
        }
    }
}

/// 一様にシャッフルしてから先頭から train / val / 残りを test に割り当てる
pub fn partition<T, R: Rng + ?Sized>(
    mut items: Vec<T>,
    ratios: SplitRatios,
    rng: &mut R,
) -> Partition<T> {
    items.shuffle(rng);

    let counts = split_counts(items.len(), ratios);
    let test = items.split_off(counts.train + counts.val);
    let val = items.split_off(counts.train);

    Partition {
        train: items,
        val,
        test,
    }
}

/// シードが指定されていれば再現可能な乱数生成器、なければエントロピーから生成
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
