//! The NEAT engine: population management, selection, reproduction,
//! elitism, and the generation loop, plus [Network::evolve] wiring a
//! dataset-error fitness into it.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    cost::Cost,
    error::{Error, Result},
    network::{Mutation, Network},
    random::{default_rng, WyRng},
    train::{validate_dataset, Sample},
};

/// How a genome's fitness is produced: one call per genome, or one call
/// handed the whole population (which must set every score itself).
pub enum Fitness {
    PerGenome(Box<dyn Fn(&mut Network) -> f64 + Send + Sync>),
    Population(Box<dyn Fn(&mut [Network]) + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum Selection {
    /// Pick index `⌊U^power · N⌋` over the sorted population.
    Power { power: u32 },
    /// Roulette over scores shifted to be non-negative.
    FitnessProportionate,
    /// Sample `size` genomes, pick the i-th best with probability
    /// `p · (1-p)^i`.
    Tournament { size: usize, probability: f64 },
}

impl Default for Selection {
    fn default() -> Self {
        Selection::Power { power: 4 }
    }
}

/// Legacy crossover flavor labels, accepted for configuration
/// compatibility. Offspring construction is always homologous
/// (innovation-aligned); see [Network::crossover].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverKind {
    SinglePoint,
    TwoPoint,
    Uniform,
    Average,
}

pub struct NeatOptions {
    pub popsize: usize,
    /// Top genomes carried unchanged (scores included) into the next
    /// generation.
    pub elitism: usize,
    /// Seeded template copies introduced each generation.
    pub provenance: usize,
    pub mutation_rate: f64,
    pub mutation_amount: usize,
    pub equal: bool,
    /// Zero recurrent state before each fitness evaluation.
    pub clear: bool,
    pub selection: Selection,
    pub crossover: Vec<CrossoverKind>,
    pub mutation: Vec<Mutation>,
    pub max_nodes: usize,
    pub max_conns: usize,
    pub max_gates: usize,
    /// Template genome; fresh `Network::new` pools are built without one.
    pub network: Option<Network>,
    /// Group genomes by compatibility distance and share fitness within
    /// each species.
    pub speciation: bool,
    pub speciation_threshold: f64,
    /// (excess, disjoint, weight) distance coefficients.
    pub distance_coefficients: (f64, f64, f64),
    pub seed: Option<u64>,
}

impl Default for NeatOptions {
    fn default() -> Self {
        Self {
            popsize: 50,
            elitism: 0,
            provenance: 0,
            mutation_rate: 0.7,
            mutation_amount: 1,
            equal: false,
            clear: false,
            selection: Selection::default(),
            crossover: vec![
                CrossoverKind::SinglePoint,
                CrossoverKind::TwoPoint,
                CrossoverKind::Uniform,
                CrossoverKind::Average,
            ],
            mutation: Mutation::FFW.to_vec(),
            max_nodes: usize::MAX,
            max_conns: usize::MAX,
            max_gates: usize::MAX,
            network: None,
            speciation: false,
            speciation_threshold: 3.,
            distance_coefficients: (1., 1., 0.4),
            seed: None,
        }
    }
}

pub struct Neat {
    pub input: usize,
    pub output: usize,
    pub population: Vec<Network>,
    pub generation: usize,
    pub options: NeatOptions,
    fitness: Fitness,
    rng: WyRng,
}

impl Neat {
    pub fn new(input: usize, output: usize, fitness: Fitness, options: NeatOptions) -> Self {
        let mut rng = match options.seed {
            Some(seed) => WyRng::seeded(seed),
            None => default_rng(),
        };
        let population = Self::create_pool(input, output, &options, &mut rng);
        Self {
            input,
            output,
            population,
            generation: 0,
            options,
            fitness,
            rng,
        }
    }

    /// `popsize` clones of the template, or fresh fully connected genomes
    /// without one. Every member gets its own generator stream.
    fn create_pool(
        input: usize,
        output: usize,
        options: &NeatOptions,
        rng: &mut WyRng,
    ) -> Vec<Network> {
        (0..options.popsize)
            .map(|_| match &options.network {
                Some(template) => {
                    let mut genome = template.clone();
                    genome.score = None;
                    genome.reseed(rng.next_u64());
                    genome
                }
                None => Network::with_seed(input, output, rng.next_u64()),
            })
            .collect()
    }

    /// Score every genome that needs it.
    pub fn evaluate(&mut self) {
        if self.options.clear {
            for genome in &mut self.population {
                genome.clear();
            }
        }
        match &self.fitness {
            Fitness::PerGenome(f) => {
                #[cfg(feature = "parallel")]
                {
                    self.population.par_iter_mut().for_each(|genome| {
                        genome.score = Some(f(genome));
                    });
                }
                #[cfg(not(feature = "parallel"))]
                for genome in &mut self.population {
                    genome.score = Some(f(genome));
                }
            }
            Fitness::Population(f) => f(&mut self.population),
        }
        if self.options.speciation {
            self.share_fitness();
        }
    }

    /// Explicit fitness sharing: each genome's score is divided by the size
    /// of its species, discouraging any one species from swallowing the
    /// population.
    fn share_fitness(&mut self) {
        let (excess_c, disjoint_c, weight_c) = self.options.distance_coefficients;
        let threshold = self.options.speciation_threshold;
        let mut representatives: Vec<usize> = Vec::new();
        let mut species_of = vec![0usize; self.population.len()];
        let mut sizes: Vec<usize> = Vec::new();
        for i in 0..self.population.len() {
            let found = representatives.iter().position(|&r| {
                Network::distance(
                    &self.population[i],
                    &self.population[r],
                    excess_c,
                    disjoint_c,
                    weight_c,
                ) < threshold
            });
            match found {
                Some(s) => {
                    species_of[i] = s;
                    sizes[s] += 1;
                }
                None => {
                    representatives.push(i);
                    species_of[i] = representatives.len() - 1;
                    sizes.push(1);
                }
            }
        }
        for (i, genome) in self.population.iter_mut().enumerate() {
            if let Some(score) = genome.score {
                genome.score = Some(score / sizes[species_of[i]] as f64);
            }
        }
    }

    /// Stable descending sort by score; unscored genomes sink.
    pub fn sort(&mut self) {
        self.population.sort_by(|a, b| {
            let a = a.score.unwrap_or(f64::MIN);
            let b = b.score.unwrap_or(f64::MIN);
            b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// One generation: evaluate if needed, sort, preserve elitists, breed
    /// and mutate the remainder. Returns a clone of the generation's
    /// fittest genome (score attached).
    pub fn evolve(&mut self) -> Result<Network> {
        if self
            .population
            .last()
            .map(|g| g.score.is_none())
            .unwrap_or(true)
        {
            self.evaluate();
        }
        self.sort();
        let fittest = self.population[0].clone();

        let elitism = self.options.elitism.min(self.options.popsize);
        let provenance = self
            .options
            .provenance
            .min(self.options.popsize - elitism);
        let elite: Vec<Network> = self.population[..elitism].to_vec();

        let mut next: Vec<Network> = Vec::with_capacity(self.options.popsize);
        for _ in 0..provenance {
            next.push(match &self.options.network {
                Some(template) => {
                    let mut genome = template.clone();
                    genome.reseed(self.rng.next_u64());
                    genome
                }
                None => Network::with_seed(self.input, self.output, self.rng.next_u64()),
            });
        }
        while next.len() < self.options.popsize - elitism {
            next.push(self.get_offspring()?);
        }
        self.mutate_genomes(&mut next);
        for genome in &mut next {
            genome.score = None;
        }
        next.extend(elite);

        self.population = next;
        self.generation += 1;
        Ok(fittest)
    }

    pub fn get_offspring(&mut self) -> Result<Network> {
        let a = self.get_parent()?;
        let b = self.get_parent()?;
        Network::crossover(&a, &b, self.options.equal, &mut self.rng)
    }

    /// Pick a breeding parent under the configured selection policy.
    pub fn get_parent(&mut self) -> Result<Network> {
        match self.options.selection {
            Selection::Power { power } => {
                self.sort();
                let u = self.rng.f64();
                let index = (u.powi(power as i32) * self.population.len() as f64) as usize;
                Ok(self.population[index.min(self.population.len() - 1)].clone())
            }
            Selection::FitnessProportionate => {
                let scores: Vec<f64> = self
                    .population
                    .iter()
                    .map(|g| g.score.unwrap_or(0.))
                    .collect();
                let min_score = scores.iter().cloned().fold(f64::INFINITY, f64::min);
                let shift = -f64::min(0., min_score);
                let total: f64 = scores.iter().map(|s| s + shift).sum();
                if total <= 0. {
                    let index = self.rng.index(self.population.len());
                    return Ok(self.population[index].clone());
                }
                let mut roll = self.rng.uniform(0., total);
                for (i, score) in scores.iter().enumerate() {
                    roll -= score + shift;
                    if roll <= 0. {
                        return Ok(self.population[i].clone());
                    }
                }
                Ok(self.population[self.population.len() - 1].clone())
            }
            Selection::Tournament { size, probability } => {
                if size > self.population.len() {
                    return Err(Error::TournamentTooLarge {
                        size,
                        popsize: self.population.len(),
                    });
                }
                // partial Fisher-Yates draw without replacement
                let mut indices: Vec<usize> = (0..self.population.len()).collect();
                for i in 0..size {
                    let j = i + self.rng.index(indices.len() - i);
                    indices.swap(i, j);
                }
                let mut contenders: Vec<usize> = indices[..size].to_vec();
                contenders.sort_by(|a, b| {
                    let a = self.population[*a].score.unwrap_or(f64::MIN);
                    let b = self.population[*b].score.unwrap_or(f64::MIN);
                    b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
                });
                for &index in &contenders {
                    if self.rng.chance(probability) {
                        return Ok(self.population[index].clone());
                    }
                }
                Ok(self.population[contenders[contenders.len() - 1]].clone())
            }
        }
    }

    /// A mutation method for this genome, or `None` when the uniform pick
    /// would breach a structural cap.
    pub fn select_mutation_method(&mut self, genome: &Network) -> Option<Mutation> {
        if self.options.mutation.is_empty() {
            return None;
        }
        let method = self.options.mutation[self.rng.index(self.options.mutation.len())];
        let capped = match method {
            Mutation::AddNode => genome.node_count() >= self.options.max_nodes,
            Mutation::AddConn | Mutation::AddBackConn | Mutation::AddSelfConn => {
                genome.conn_count() >= self.options.max_conns
            }
            Mutation::AddGate => genome.gate_count() >= self.options.max_gates,
            _ => false,
        };
        if capped {
            tracing::warn!(?method, "mutation blocked by structural cap");
            None
        } else {
            Some(method)
        }
    }

    fn mutate_genomes(&mut self, genomes: &mut [Network]) {
        for genome in genomes {
            if self.rng.chance(self.options.mutation_rate) {
                for _ in 0..self.options.mutation_amount {
                    if let Some(method) = self.select_mutation_method(genome) {
                        genome.mutate(method);
                    }
                }
            }
        }
    }

    /// Fittest genome, evaluating and sorting first when needed.
    pub fn get_fittest(&mut self) -> &Network {
        if self.population.iter().any(|g| g.score.is_none()) {
            self.evaluate();
        }
        self.sort();
        &self.population[0]
    }

    /// Mean population score.
    pub fn get_average(&mut self) -> f64 {
        if self.population.iter().any(|g| g.score.is_none()) {
            self.evaluate();
        }
        let total: f64 = self
            .population
            .iter()
            .map(|g| g.score.unwrap_or(0.))
            .sum();
        total / self.population.len().max(1) as f64
    }

    pub fn export(&self) -> Vec<Value> {
        self.population.iter().map(|g| g.to_json()).collect()
    }

    /// Replace the population; `popsize` becomes the imported length.
    pub fn import(&mut self, genomes: &[Value]) -> Result<()> {
        let mut population = Vec::with_capacity(genomes.len());
        for value in genomes {
            population.push(Network::from_json(value)?);
        }
        self.options.popsize = population.len();
        self.population = population;
        Ok(())
    }
}

// ---- network-level evolution -------------------------------------------

pub struct EvolveOptions {
    /// Generation budget; at least one of `iterations` and `error` is
    /// required.
    pub iterations: Option<u32>,
    /// Stop once the dataset error reaches this.
    pub error: Option<f64>,
    pub cost: Cost,
    /// Parsimony pressure: fitness pays this per hidden node, connection,
    /// and gate. Zero keeps fitness at exactly negative mean error.
    pub growth: f64,
    pub neat: NeatOptions,
    pub log: Option<u32>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for EvolveOptions {
    fn default() -> Self {
        Self {
            iterations: None,
            error: None,
            cost: Cost::Mse,
            growth: 0.,
            neat: NeatOptions::default(),
            log: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvolveResult {
    pub error: f64,
    pub iterations: u32,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl Network {
    /// Evolve this network against a dataset: a NEAT engine is seeded with
    /// clones of `self`, fitness is the negative mean cost (minus optional
    /// growth pressure), and the best genome found replaces `self`.
    pub fn evolve(&mut self, set: &[Sample], options: EvolveOptions) -> Result<EvolveResult> {
        validate_dataset(self, set)?;
        if options.iterations.is_none() && options.error.is_none() {
            return Err(Error::MissingStoppingCondition);
        }

        let cost = options.cost;
        let growth = options.growth;
        let data: Arc<Vec<Sample>> = Arc::new(set.to_vec());
        let fitness_data = Arc::clone(&data);
        let fitness = Fitness::PerGenome(Box::new(move |genome: &mut Network| {
            let mut total = 0.;
            for sample in fitness_data.iter() {
                match genome.no_trace_activate(&sample.input) {
                    Ok(out) => total += cost.loss(&sample.output, &out),
                    Err(_) => return f64::MIN,
                }
            }
            let error = total / fitness_data.len() as f64;
            let size = genome.hidden_count() + genome.conn_count() + genome.gate_count();
            -error - growth * size as f64
        }));

        let mut neat_options = options.neat;
        neat_options.network = Some(self.clone());
        let mut neat = Neat::new(self.input, self.output, fitness, neat_options);

        let start = Instant::now();
        let mut generations = 0u32;
        let mut cancelled = false;
        let mut best: Option<Network> = None;
        let mut best_error = f64::INFINITY;
        loop {
            if let Some(max) = options.iterations {
                if generations >= max {
                    break;
                }
            }
            if let Some(token) = &options.cancel {
                if token.load(Ordering::Relaxed) {
                    cancelled = true;
                    break;
                }
            }

            let mut fittest = neat.evolve()?;
            generations += 1;
            let error = fittest.test(&data, cost)?;
            if error < best_error {
                best_error = error;
                best = Some(fittest);
            }
            if let Some(every) = options.log {
                if every > 0 && generations % every == 0 {
                    tracing::info!(generation = generations, error = best_error, "evolving");
                }
            }
            if let Some(target) = options.error {
                if best_error <= target {
                    break;
                }
            }
        }

        if let Some(best) = best {
            *self = best;
        }
        Ok(EvolveResult {
            error: best_error,
            iterations: generations,
            elapsed: start.elapsed(),
            cancelled,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn xor_set() -> Vec<Sample> {
        vec![
            Sample::new(vec![0., 0.], vec![0.]),
            Sample::new(vec![0., 1.], vec![1.]),
            Sample::new(vec![1., 0.], vec![1.]),
            Sample::new(vec![1., 1.], vec![0.]),
        ]
    }

    fn mean_fitness() -> Fitness {
        Fitness::PerGenome(Box::new(|genome: &mut Network| {
            // toy fitness: prefer small weights
            -genome
                .connection_ids()
                .map(|cid| genome.conn(cid).weight.abs())
                .sum::<f64>()
        }))
    }

    #[test]
    fn test_pool_has_popsize_members() {
        let neat = Neat::new(2, 1, mean_fitness(), NeatOptions::default());
        assert_eq!(neat.population.len(), 50);
        assert_eq!(neat.generation, 0);
        for genome in &neat.population {
            assert_eq!(genome.input, 2);
            assert_eq!(genome.output, 1);
            assert!(genome.score.is_none());
        }
    }

    #[test]
    fn test_template_pool_clones_topology() {
        let mut template = Network::with_seed(2, 1, 3);
        template.mutate(Mutation::AddNode);
        let neat = Neat::new(
            2,
            1,
            mean_fitness(),
            NeatOptions {
                popsize: 10,
                network: Some(template.clone()),
                seed: Some(1),
                ..NeatOptions::default()
            },
        );
        for genome in &neat.population {
            assert_eq!(genome.node_count(), template.node_count());
        }
    }

    #[test]
    fn test_evolve_keeps_popsize_and_elite_scores() {
        let mut neat = Neat::new(
            2,
            1,
            mean_fitness(),
            NeatOptions {
                popsize: 20,
                elitism: 3,
                seed: Some(9),
                ..NeatOptions::default()
            },
        );
        neat.evaluate();
        neat.sort();
        let top_scores: Vec<f64> = neat.population[..3]
            .iter()
            .map(|g| g.score.unwrap())
            .collect();

        neat.evolve().unwrap();
        assert_eq!(neat.population.len(), 20);
        assert_eq!(neat.generation, 1);
        let carried: Vec<f64> = neat
            .population
            .iter()
            .filter_map(|g| g.score)
            .collect();
        assert_eq!(carried, top_scores);
    }

    #[test]
    fn test_provenance_reintroduces_template() {
        let template = Network::with_seed(2, 1, 5);
        let mut neat = Neat::new(
            2,
            1,
            mean_fitness(),
            NeatOptions {
                popsize: 10,
                provenance: 4,
                network: Some(template.clone()),
                seed: Some(2),
                ..NeatOptions::default()
            },
        );
        neat.evolve().unwrap();
        let clones = neat
            .population
            .iter()
            .filter(|g| g.node_count() == template.node_count())
            .count();
        assert!(clones >= 4);
    }

    #[test]
    fn test_tournament_too_large_fails() {
        let mut neat = Neat::new(
            2,
            1,
            mean_fitness(),
            NeatOptions {
                popsize: 2,
                selection: Selection::Tournament {
                    size: 3,
                    probability: 0.5,
                },
                ..NeatOptions::default()
            },
        );
        assert!(matches!(
            neat.get_parent(),
            Err(Error::TournamentTooLarge { size: 3, popsize: 2 })
        ));
    }

    #[test]
    fn test_selection_policies_prefer_fit_genomes() {
        for selection in [
            Selection::Power { power: 4 },
            Selection::FitnessProportionate,
            Selection::Tournament {
                size: 5,
                probability: 0.9,
            },
        ] {
            let mut neat = Neat::new(
                2,
                1,
                mean_fitness(),
                NeatOptions {
                    popsize: 20,
                    selection,
                    seed: Some(31),
                    ..NeatOptions::default()
                },
            );
            // rig the scores: genome 0 dominates after sorting
            for (i, genome) in neat.population.iter_mut().enumerate() {
                genome.score = Some(if i == 0 { 100. } else { 1. });
            }
            neat.sort();
            let best_score = neat.population[0].score;
            let mut hits = 0;
            for _ in 0..200 {
                if neat.get_parent().unwrap().score == best_score {
                    hits += 1;
                }
            }
            assert!(
                hits > 20,
                "{selection:?} rarely picked the best ({hits}/200)"
            );
        }
    }

    #[test]
    fn test_mutation_cap_blocks_add_node() {
        let mut neat = Neat::new(
            2,
            1,
            mean_fitness(),
            NeatOptions {
                popsize: 5,
                mutation: vec![Mutation::AddNode],
                max_nodes: 3, // exactly the starting node count
                seed: Some(4),
                ..NeatOptions::default()
            },
        );
        let genome = neat.population[0].clone();
        for _ in 0..20 {
            assert_eq!(neat.select_mutation_method(&genome), None);
        }
        neat.evolve().unwrap();
        for genome in &neat.population {
            assert_eq!(genome.node_count(), 3, "cap breached");
        }
    }

    #[test]
    fn test_population_fitness_sets_all_scores() {
        let fitness = Fitness::Population(Box::new(|population: &mut [Network]| {
            for (i, genome) in population.iter_mut().enumerate() {
                genome.score = Some(i as f64);
            }
        }));
        let mut neat = Neat::new(
            2,
            1,
            fitness,
            NeatOptions {
                popsize: 8,
                seed: Some(6),
                ..NeatOptions::default()
            },
        );
        neat.evaluate();
        assert!(neat.population.iter().all(|g| g.score.is_some()));
        assert_eq!(neat.get_fittest().score, Some(7.));
    }

    #[test]
    fn test_get_average() {
        let fitness = Fitness::Population(Box::new(|population: &mut [Network]| {
            for genome in population.iter_mut() {
                genome.score = Some(2.);
            }
        }));
        let mut neat = Neat::new(2, 1, fitness, NeatOptions {
            popsize: 4,
            ..NeatOptions::default()
        });
        assert_eq!(neat.get_average(), 2.);
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut neat = Neat::new(
            2,
            1,
            mean_fitness(),
            NeatOptions {
                popsize: 6,
                seed: Some(8),
                ..NeatOptions::default()
            },
        );
        let exported = neat.export();
        assert_eq!(exported.len(), 6);
        let mut other = Neat::new(
            2,
            1,
            mean_fitness(),
            NeatOptions {
                popsize: 3,
                ..NeatOptions::default()
            },
        );
        other.import(&exported).unwrap();
        assert_eq!(other.population.len(), 6);
        assert_eq!(other.options.popsize, 6);
    }

    #[test]
    fn test_fitness_sharing_penalizes_crowds() {
        let mut neat = Neat::new(
            2,
            1,
            mean_fitness(),
            NeatOptions {
                popsize: 10,
                speciation: true,
                seed: Some(12),
                ..NeatOptions::default()
            },
        );
        for genome in &mut neat.population {
            genome.score = Some(10.);
        }
        neat.share_fitness();
        // identical topologies form one species of 10
        for genome in &neat.population {
            assert_eq!(genome.score, Some(1.));
        }
    }

    #[test]
    fn test_evolve_requires_stopping_condition() {
        let mut net = Network::with_seed(2, 1, 1);
        assert!(matches!(
            net.evolve(&xor_set(), EvolveOptions::default()),
            Err(Error::MissingStoppingCondition)
        ));
    }

    #[test]
    fn test_evolve_improves_xor() {
        let mut net = Network::with_seed(2, 1, 2024);
        let result = net
            .evolve(
                &xor_set(),
                EvolveOptions {
                    iterations: Some(600),
                    error: Some(0.03),
                    neat: NeatOptions {
                        popsize: 50,
                        elitism: 10,
                        mutation_rate: 0.5,
                        equal: true,
                        seed: Some(2024),
                        ..NeatOptions::default()
                    },
                    ..EvolveOptions::default()
                },
            )
            .unwrap();
        // constant output scores 0.25 on XOR; evolution must beat that
        assert!(result.error < 0.25, "no XOR progress: {}", result.error);
        assert!(result.iterations <= 300);
        // the caller's network now carries the champion
        let check = net.test(&xor_set(), Cost::Mse).unwrap();
        assert!((check - result.error).abs() < 1e-9);
    }

    #[test]
    fn test_evolve_cancellation() {
        let mut net = Network::with_seed(2, 1, 3);
        let token = Arc::new(AtomicBool::new(true));
        let result = net
            .evolve(
                &xor_set(),
                EvolveOptions {
                    iterations: Some(100),
                    cancel: Some(token),
                    ..EvolveOptions::default()
                },
            )
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.iterations, 0);
    }
}
