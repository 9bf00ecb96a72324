//! Problem document loading
//!
//! The on-disk problem format is JSON with self-describing configurations
//! (a `configuration_type` discriminator plus a per-family sub-type).
//! Documents decode into plain serde structs here and are then lowered
//! onto `ProblemBuilder`, which owns all semantic validation.

use serde::{Deserialize, Serialize};
use stas_core::{
    Configuration, Environment, GraphEnvironment, GridEnvironment, InputError, MemoisingOracle,
    ProblemBuilder, ProblemInputs, QueryBudget, SchedulerParameters, SearchParameters, Species,
    TraitReduction,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read problem file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed problem document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("robot '{robot}' references unknown species '{species}'")]
    UnknownSpecies { robot: String, species: String },

    #[error("plan task index {index} is out of range ({tasks} tasks)")]
    PlanTaskOutOfRange { index: usize, tasks: usize },

    #[error(transparent)]
    Invalid(#[from] InputError),
}

// ============================================================================
// Document types
// ============================================================================

/// A spatial configuration as it appears on disk
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "configuration_type", rename_all = "snake_case")]
pub enum ConfigurationDoc {
    Ompl {
        state_space_type: StateSpaceType,
        x: f32,
        y: f32,
        #[serde(default)]
        z: f32,
        #[serde(default)]
        yaw: f32,
        #[serde(default = "one")]
        qw: f32,
        #[serde(default)]
        qx: f32,
        #[serde(default)]
        qy: f32,
        #[serde(default)]
        qz: f32,
    },
    Graph {
        #[serde(default)]
        graph_type: GraphType,
        vertex: u32,
        #[serde(default)]
        x: f32,
        #[serde(default)]
        y: f32,
    },
}

fn one() -> f32 {
    1.0
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSpaceType {
    Se2,
    Se3,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphType {
    #[default]
    Point,
    SampledPoint,
    Grid,
}

impl From<&ConfigurationDoc> for Configuration {
    fn from(doc: &ConfigurationDoc) -> Self {
        match *doc {
            ConfigurationDoc::Ompl {
                state_space_type: StateSpaceType::Se2,
                x,
                y,
                yaw,
                ..
            } => Configuration::Se2 { x, y, yaw },
            ConfigurationDoc::Ompl {
                state_space_type: StateSpaceType::Se3,
                x,
                y,
                z,
                qw,
                qx,
                qy,
                qz,
                ..
            } => Configuration::Se3 {
                x,
                y,
                z,
                qw,
                qx,
                qy,
                qz,
            },
            ConfigurationDoc::Graph { vertex, x, y, .. } => Configuration::Graph { vertex, x, y },
        }
    }
}

impl From<&Configuration> for ConfigurationDoc {
    fn from(config: &Configuration) -> Self {
        match *config {
            Configuration::Se2 { x, y, yaw } => ConfigurationDoc::Ompl {
                state_space_type: StateSpaceType::Se2,
                x,
                y,
                z: 0.0,
                yaw,
                qw: 1.0,
                qx: 0.0,
                qy: 0.0,
                qz: 0.0,
            },
            Configuration::Se3 {
                x,
                y,
                z,
                qw,
                qx,
                qy,
                qz,
            } => ConfigurationDoc::Ompl {
                state_space_type: StateSpaceType::Se3,
                x,
                y,
                z,
                yaw: 0.0,
                qw,
                qx,
                qy,
                qz,
            },
            Configuration::Graph { vertex, x, y } => ConfigurationDoc::Graph {
                graph_type: GraphType::Point,
                vertex,
                x,
                y,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VertexDoc {
    pub id: u32,
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeDoc {
    pub from: u32,
    pub to: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
}

/// Environment description per planner family
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnvironmentDoc {
    #[serde(default)]
    pub vertices: Vec<VertexDoc>,
    #[serde(default)]
    pub edges: Vec<EdgeDoc>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default = "default_cell_size")]
    pub cell_size: f32,
    #[serde(default)]
    pub obstacles: Vec<(i32, i32)>,
}

fn default_cell_size() -> f32 {
    1.0
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerType {
    OpenSpace,
    Graph,
    Grid,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlannerParametersDoc {
    #[serde(default)]
    pub max_expansions: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MotionPlannerDoc {
    pub mp_type: PlannerType,
    #[serde(default)]
    pub environment_parameters: EnvironmentDoc,
    #[serde(default)]
    pub mp_parameters: PlannerParametersDoc,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpeciesDoc {
    pub name: String,
    pub traits: Vec<f32>,
    pub bounding_radius: f32,
    pub speed: f32,
    #[serde(default)]
    pub mp_index: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RobotDoc {
    pub name: String,
    pub species: String,
    pub initial_configuration: ConfigurationDoc,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDoc {
    pub name: String,
    pub duration: f32,
    pub desired_traits: Vec<f32>,
    pub initial_configuration: ConfigurationDoc,
    pub terminal_configuration: ConfigurationDoc,
}

/// The whole problem document
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProblemDoc {
    #[serde(default)]
    pub motion_planners: Vec<MotionPlannerDoc>,
    pub species: Vec<SpeciesDoc>,
    pub robots: Vec<RobotDoc>,
    pub tasks: Vec<TaskDoc>,
    #[serde(default)]
    pub precedence_constraints: Vec<(usize, usize)>,
    /// Optional selection of tasks forming the plan; defaults to all tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_task_indices: Option<Vec<usize>>,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default)]
    pub best_makespan: f32,
    pub worst_makespan: f32,
    #[serde(default)]
    pub scheduler_parameters: Option<SchedulerParameters>,
    #[serde(default)]
    pub itags_parameters: Option<SearchParameters>,
    #[serde(default)]
    pub robot_traits_matrix_reduction: Option<TraitReduction>,
}

fn default_alpha() -> f32 {
    0.5
}

// ============================================================================
// Lowering
// ============================================================================

impl ProblemDoc {
    /// Decode a problem document from a JSON string
    pub fn from_json(text: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Lower the document into validated problem inputs
    pub fn into_inputs(self) -> Result<Arc<ProblemInputs>, LoadError> {
        let mut builder = ProblemBuilder::new()
            .alpha(self.alpha)
            .makespan_bounds(self.best_makespan, self.worst_makespan);

        let mut budget: Option<usize> = None;
        for planner in &self.motion_planners {
            let environment = match planner.mp_type {
                PlannerType::OpenSpace => Environment::OpenSpace,
                PlannerType::Graph => {
                    let env = &planner.environment_parameters;
                    let vertices: Vec<(u32, f32, f32)> =
                        env.vertices.iter().map(|v| (v.id, v.x, v.y)).collect();
                    let edges: Vec<(u32, u32, Option<f32>)> =
                        env.edges.iter().map(|e| (e.from, e.to, e.weight)).collect();
                    Environment::Graph(GraphEnvironment::new(&vertices, &edges))
                }
                PlannerType::Grid => {
                    let env = &planner.environment_parameters;
                    Environment::Grid(GridEnvironment::new(
                        env.width,
                        env.height,
                        env.cell_size,
                        env.obstacles.clone(),
                    ))
                }
            };
            builder = builder.planner(Arc::new(MemoisingOracle::new(environment)));
            if let Some(max) = planner.mp_parameters.max_expansions {
                budget = Some(budget.map_or(max, |b| b.min(max)));
            }
        }
        if let Some(max_expansions) = budget {
            builder = builder.query_budget(QueryBudget { max_expansions });
        }

        let mut species_handles = Vec::new();
        for doc in &self.species {
            let handle = Arc::new(Species::new(
                doc.name.clone(),
                doc.traits.clone(),
                doc.bounding_radius,
                doc.speed,
                doc.mp_index,
            ));
            species_handles.push(handle.clone());
            builder = builder.species(handle);
        }

        for doc in &self.robots {
            let species = species_handles
                .iter()
                .find(|s| s.name == doc.species)
                .ok_or_else(|| LoadError::UnknownSpecies {
                    robot: doc.name.clone(),
                    species: doc.species.clone(),
                })?;
            builder = builder.robot(
                doc.name.clone(),
                Arc::clone(species),
                Configuration::from(&doc.initial_configuration),
            );
        }

        // Select the plan tasks, defaulting to every task in order.
        let plan: Vec<usize> = match &self.plan_task_indices {
            Some(indices) => {
                for &index in indices {
                    if index >= self.tasks.len() {
                        return Err(LoadError::PlanTaskOutOfRange {
                            index,
                            tasks: self.tasks.len(),
                        });
                    }
                }
                indices.clone()
            }
            None => (0..self.tasks.len()).collect(),
        };
        for &index in &plan {
            let doc = &self.tasks[index];
            builder = builder.task(
                doc.name.clone(),
                doc.duration,
                doc.desired_traits.clone(),
                Configuration::from(&doc.initial_configuration),
                Configuration::from(&doc.terminal_configuration),
            );
        }

        for &(pred, succ) in &self.precedence_constraints {
            builder = builder.precedence(pred, succ);
        }

        if let Some(parameters) = self.scheduler_parameters {
            builder = builder.scheduler_parameters(parameters);
        }
        if let Some(parameters) = self.itags_parameters {
            builder = builder.search_parameters(parameters);
        }
        if let Some(reduction) = self.robot_traits_matrix_reduction {
            builder = builder.reduction(reduction);
        }

        Ok(builder.build()?)
    }
}

/// Read and lower a problem file in one step
pub fn load_problem(path: &std::path::Path) -> Result<Arc<ProblemInputs>, LoadError> {
    let text = std::fs::read_to_string(path)?;
    ProblemDoc::from_json(&text)?.into_inputs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "species": [
            {"name": "rover", "traits": [1.0], "bounding_radius": 0.5, "speed": 1.0}
        ],
        "robots": [
            {"name": "r0", "species": "rover",
             "initial_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0}}
        ],
        "tasks": [
            {"name": "survey", "duration": 1.0, "desired_traits": [1.0],
             "initial_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0},
             "terminal_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0}}
        ],
        "alpha": 1.0,
        "best_makespan": 1.0,
        "worst_makespan": 1.0
    }"#;

    #[test]
    fn minimal_document_lowers() {
        let inputs = ProblemDoc::from_json(MINIMAL).unwrap().into_inputs().unwrap();
        assert_eq!(inputs.num_robots(), 1);
        assert_eq!(inputs.num_tasks(), 1);
        assert_eq!(inputs.alpha, 1.0);
        // With no planners declared, an open-space oracle is implied.
        assert_eq!(inputs.planners.len(), 1);
    }

    #[test]
    fn unknown_species_is_reported() {
        let text = MINIMAL.replace("\"species\": \"rover\"", "\"species\": \"ghost\"");
        let error = ProblemDoc::from_json(&text).unwrap().into_inputs().unwrap_err();
        assert!(matches!(error, LoadError::UnknownSpecies { .. }));
    }

    #[test]
    fn graph_configurations_decode() {
        let text = r#"{
            "motion_planners": [
                {"mp_type": "graph",
                 "environment_parameters": {
                    "vertices": [{"id": 0, "x": 0.0, "y": 0.0}, {"id": 1, "x": 2.0, "y": 0.0}],
                    "edges": [{"from": 0, "to": 1}]
                 }}
            ],
            "species": [
                {"name": "walker", "traits": [1.0], "bounding_radius": 0.4, "speed": 1.0, "mp_index": 0}
            ],
            "robots": [
                {"name": "w0", "species": "walker",
                 "initial_configuration": {"configuration_type": "graph", "vertex": 0}}
            ],
            "tasks": [
                {"name": "visit", "duration": 1.0, "desired_traits": [1.0],
                 "initial_configuration": {"configuration_type": "graph", "vertex": 1, "x": 2.0},
                 "terminal_configuration": {"configuration_type": "graph", "vertex": 1, "x": 2.0}}
            ],
            "worst_makespan": 10.0
        }"#;
        let inputs = ProblemDoc::from_json(text).unwrap().into_inputs().unwrap();
        assert!(matches!(
            inputs.robot(0).initial_configuration,
            Configuration::Graph { vertex: 0, .. }
        ));
    }

    #[test]
    fn plan_task_indices_select_a_subset() {
        let text = r#"{
            "species": [{"name": "rover", "traits": [1.0], "bounding_radius": 0.5, "speed": 1.0}],
            "robots": [{"name": "r0", "species": "rover",
                "initial_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0}}],
            "tasks": [
                {"name": "a", "duration": 1.0, "desired_traits": [1.0],
                 "initial_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0},
                 "terminal_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0}},
                {"name": "b", "duration": 2.0, "desired_traits": [1.0],
                 "initial_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0},
                 "terminal_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0}}
            ],
            "plan_task_indices": [1],
            "worst_makespan": 5.0
        }"#;
        let inputs = ProblemDoc::from_json(text).unwrap().into_inputs().unwrap();
        assert_eq!(inputs.num_tasks(), 1);
        assert_eq!(inputs.task(0).name, "b");
        assert_eq!(inputs.task(0).static_duration, 2.0);
    }

    #[test]
    fn out_of_range_plan_index_is_reported() {
        let text = MINIMAL.replace("\"alpha\": 1.0", "\"plan_task_indices\": [7], \"alpha\": 1.0");
        let error = ProblemDoc::from_json(&text).unwrap().into_inputs().unwrap_err();
        assert!(matches!(error, LoadError::PlanTaskOutOfRange { index: 7, .. }));
    }

    #[test]
    fn invalid_alpha_surfaces_input_error() {
        let text = MINIMAL.replace("\"alpha\": 1.0", "\"alpha\": 2.0");
        let error = ProblemDoc::from_json(&text).unwrap().into_inputs().unwrap_err();
        assert!(matches!(
            error,
            LoadError::Invalid(InputError::AlphaOutOfRange(_))
        ));
    }

    #[test]
    fn document_round_trips_through_json() {
        let doc = ProblemDoc::from_json(MINIMAL).unwrap();
        let encoded = serde_json::to_string(&doc).unwrap();
        let decoded = ProblemDoc::from_json(&encoded).unwrap();
        let inputs = decoded.into_inputs().unwrap();
        assert_eq!(inputs.num_tasks(), 1);
        assert_eq!(inputs.schedule_worst_makespan, 1.0);
    }
}
