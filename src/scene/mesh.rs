use std::{fs, path::Path};

use indexmap::IndexMap;
use thiserror::Error;

use crate::geometry::{Triangle, WorldPoint};

#[derive(Debug, Error)]
pub enum ObjOpenError {
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse file: {0}")]
    ParseError(#[from] wavefront_obj::ParseError),

    #[error("Vertex {index} is out of range, object {object:?} has {count} vertices")]
    VertexOutOfRange {
        object: String,
        index: usize,
        count: usize,
    },

    #[error("The mesh contains no triangles")]
    Empty,
}

/// Indexed triangle mesh, all objects of the source file merged together.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<WorldPoint>,
    pub indices: Vec<Triangle<usize>>,
}

impl Mesh {
    pub fn with_obj(p: impl AsRef<Path>) -> Result<Mesh, ObjOpenError> {
        let content = fs::read_to_string(p)?;
        Self::from_obj_source(content)
    }

    /// Parses the content of an OBJ file.
    /// Only triangles are kept, points and lines are skipped.
    pub fn from_obj_source(content: String) -> Result<Mesh, ObjOpenError> {
        let parsed = wavefront_obj::obj::parse(content)?;

        let mut indices = Vec::new();
        // (object, vertex index within the object) -> position
        let mut vertices = IndexMap::new();

        for (object_index, o) in parsed.objects.iter().enumerate() {
            for geometry in &o.geometry {
                for shape in &geometry.shapes {
                    let wavefront_obj::obj::Primitive::Triangle(a, b, c) = &shape.primitive else {
                        continue;
                    };

                    let mut handle_vertex = |vtindex: (usize, Option<usize>, Option<usize>)| {
                        let vertex =
                            o.vertices
                                .get(vtindex.0)
                                .ok_or_else(|| ObjOpenError::VertexOutOfRange {
                                    object: o.name.clone(),
                                    index: vtindex.0,
                                    count: o.vertices.len(),
                                })?;
                        let entry = vertices.entry((object_index, vtindex.0));
                        let index = entry.index();
                        entry.or_insert_with(|| {
                            WorldPoint::new(vertex.x as f32, vertex.y as f32, vertex.z as f32)
                        });
                        Ok::<_, ObjOpenError>(index)
                    };

                    let a = handle_vertex(*a)?;
                    let b = handle_vertex(*b)?;
                    let c = handle_vertex(*c)?;

                    indices.push(Triangle::new(a, b, c));
                }
            }
        }

        if indices.is_empty() {
            return Err(ObjOpenError::Empty);
        }

        Ok(Mesh {
            vertices: vertices.into_values().collect(),
            indices,
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// Triangles with resolved vertex positions, in file order.
    pub fn triangles(&self) -> Vec<Triangle<WorldPoint>> {
        self.indices
            .iter()
            .map(|t| t.map(|i| self.vertices[*i]))
            .collect()
    }
}

/// Loads all triangles of an OBJ file.
pub fn load_obj(p: impl AsRef<Path>) -> Result<Vec<Triangle<WorldPoint>>, ObjOpenError> {
    Ok(Mesh::with_obj(p)?.triangles())
}
