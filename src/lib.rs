//! Litmine - Scientific Literature Mining Pipeline
//!
//! Litmine es un pipeline de investigación asistido por LLM que combina
//! recuperación aumentada (RAG) sobre literatura científica con un flujo
//! multi-etapa de generación y evaluación de hipótesis.
//!
//! # Arquitectura
//!
//! - **Ingesta de PDFs**: extracción de texto y segmentación en pasajes
//!   con solapamiento configurable
//! - **Índice Vectorial**: embeddings con fastembed, búsqueda exacta por
//!   similitud coseno, persistencia con bincode
//! - **Pipeline de Investigación**: etapas fijas de resumen, hipótesis,
//!   validación y análisis de brechas, cada una con contexto recuperado
//! - **Evaluación**: similitud de embeddings entre cada salida generada y
//!   los pasajes que la fundamentan
//! - **Experimentos**: barridos de configuración con una fila de métricas
//!   por experimento en una tabla CSV
//!
//! # Módulos Principales
//!
//! - [`ingest`] - Extracción de texto PDF y segmentación en pasajes
//! - [`index`] - Índice vectorial persistente y retriever
//! - [`generate`] - Proveedores de modelos (Ollama, OpenAI) y reintentos
//! - [`pipeline`] - Pipeline de investigación multi-etapa
//! - [`eval`] - Evaluación por similitud de embeddings
//! - [`experiment`] - Ejecución de experimentos y tabla de resultados
//!
//! # Ejemplo de Uso
//!
//! ```rust,no_run
//! use litmine::config::AppConfig;
//! use litmine::experiment::{default_grid, ExperimentRunner};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AppConfig::load(None)?;
//! let experiments = default_grid(vec!["papers/attention.pdf".into()]);
//!
//! let runner = ExperimentRunner::new(config);
//! let rows = runner.run_all(&experiments).await?;
//! println!("{} experiments completed", rows.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod eval;
pub mod experiment;
pub mod generate;
pub mod index;
pub mod ingest;
pub mod pipeline;

pub use config::AppConfig;
pub use embedding::{create_embedder, TextEmbedder};
pub use eval::Evaluator;
pub use experiment::ExperimentRunner;
pub use generate::{create_provider, ModelProvider};
pub use index::{Retriever, VectorIndex};
pub use pipeline::ResearchPipeline;
