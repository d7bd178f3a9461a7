//! PLY point-cloud decoding and PLY mesh writing.
//!
//! Point clouds are read with `ply-rs` (ASCII and binary). The header is
//! read on its own first; its vertex element is scanned into a
//! [`FieldSchema`] and the required fields are checked before the payload
//! is parsed, so a cloud with missing or badly typed positions/normals is
//! rejected without reading its body.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ply_rs::parser::Parser;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Header, Payload, Ply, Property, PropertyDef,
    PropertyType, ScalarType,
};
use ply_rs::writer::Writer;
use tracing::{debug, info};

use crate::error::{TerrainError, TerrainResult, try_reserve};
use crate::record::{
    DecodedCloud, FieldSchema, FieldWidth, PointCloudSource, RawPointRecord, field_names,
};
use crate::types::TerrainMesh;

/// Default output file name.
pub const DEFAULT_OUTPUT: &str = "odm_25dmesh.ply";

/// A PLY point cloud on disk.
#[derive(Debug, Clone)]
pub struct PlyPointCloud {
    path: PathBuf,
}

impl PlyPointCloud {
    /// Refer to the PLY file at `path`. Nothing is read until [`decode`](PointCloudSource::decode).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PointCloudSource for PlyPointCloud {
    fn decode(&self) -> TerrainResult<DecodedCloud> {
        let path = self.path.as_path();
        info!("Loading point cloud from {:?}", path);

        let file = File::open(path).map_err(|e| TerrainError::io_read(path, e))?;
        let mut reader = BufReader::new(file);

        let parser = Parser::<DefaultElement>::new();
        let header = parser
            .read_header(&mut reader)
            .map_err(|e| TerrainError::parse_error(path, format!("PLY header error: {}", e)))?;
        let layout = VertexLayout::from_header(&header, path)?;

        let payload = parser
            .read_payload(&mut reader, &header)
            .map_err(|e| TerrainError::parse_error(path, format!("PLY payload error: {}", e)))?;

        let cloud = layout.decode(&payload, path)?;
        info!("Decoded {} points from {:?}", cloud.len(), path);
        Ok(cloud)
    }
}

/// Vertex properties to read, resolved from the header alone.
struct VertexLayout {
    schema: FieldSchema,
    normal_names: [&'static str; 3],
    use_classification: bool,
    use_height: bool,
}

impl VertexLayout {
    fn from_header(header: &Header, path: &Path) -> TerrainResult<Self> {
        let element = header
            .elements
            .get("vertex")
            .ok_or_else(|| TerrainError::parse_error(path, "PLY file has no vertex element"))?;

        let schema = FieldSchema::scan(
            element
                .properties
                .iter()
                .map(|(name, def)| (name.as_str(), field_width(&def.data_type))),
        );
        schema.check_required()?;

        // Each component may use either alias.
        let mut normal_names = field_names::NORMAL_SHORT;
        for (slot, long) in normal_names.iter_mut().zip(field_names::NORMAL) {
            if element.properties.contains_key(long) {
                *slot = long;
            }
        }

        Ok(Self {
            use_classification: schema.classification == Some(FieldWidth::U8),
            use_height: schema
                .height_above_ground
                .as_ref()
                .is_some_and(FieldWidth::is_float),
            schema,
            normal_names,
        })
    }

    fn decode(self, payload: &Payload<DefaultElement>, path: &Path) -> TerrainResult<DecodedCloud> {
        let empty = Vec::new();
        let vertices = payload.get("vertex").unwrap_or(&empty);

        let mut records = Vec::new();
        try_reserve(&mut records, vertices.len(), "decoded point records")?;

        for (index, vertex) in vertices.iter().enumerate() {
            let position = read_vec3(vertex, &field_names::POSITION, index, path)?;
            let normal = read_vec3(vertex, &self.normal_names, index, path)?;

            let mut record = RawPointRecord::new(position, normal);
            if self.use_classification {
                if let Some(Property::UChar(c)) = vertex.get(field_names::CLASSIFICATION) {
                    record.classification = Some(*c);
                }
            }
            if self.use_height {
                record.height_above_ground =
                    read_float(vertex.get(field_names::HEIGHT_ABOVE_GROUND));
            }
            records.push(record);
        }

        debug!(
            points = records.len(),
            classification = self.use_classification,
            height_above_ground = self.use_height,
            "PLY vertices decoded"
        );

        Ok(DecodedCloud {
            schema: self.schema,
            records,
        })
    }
}

fn field_width(data_type: &PropertyType) -> FieldWidth {
    match data_type {
        PropertyType::Scalar(ScalarType::Float) => FieldWidth::F32,
        PropertyType::Scalar(ScalarType::Double) => FieldWidth::F64,
        PropertyType::Scalar(ScalarType::UChar) => FieldWidth::U8,
        PropertyType::Scalar(other) => FieldWidth::Other(scalar_name(other).to_string()),
        PropertyType::List(_, item) => FieldWidth::Other(format!("list of {}", scalar_name(item))),
    }
}

fn scalar_name(scalar: &ScalarType) -> &'static str {
    match scalar {
        ScalarType::Char => "int8",
        ScalarType::UChar => "uint8",
        ScalarType::Short => "int16",
        ScalarType::UShort => "uint16",
        ScalarType::Int => "int32",
        ScalarType::UInt => "uint32",
        ScalarType::Float => "float32",
        ScalarType::Double => "float64",
    }
}

fn read_float(prop: Option<&Property>) -> Option<f64> {
    match prop {
        Some(Property::Float(v)) => Some(*v as f64),
        Some(Property::Double(v)) => Some(*v),
        _ => None,
    }
}

fn read_vec3(
    vertex: &DefaultElement,
    names: &[&str; 3],
    index: usize,
    path: &Path,
) -> TerrainResult<[f64; 3]> {
    let mut out = [0.0; 3];
    for (slot, name) in out.iter_mut().zip(names) {
        *slot = read_float(vertex.get(*name)).ok_or_else(|| {
            TerrainError::parse_error(
                path,
                format!("vertex {} has no float value for '{}'", index, name),
            )
        })?;
    }
    Ok(out)
}

/// Destination for a finished mesh.
pub trait MeshSink {
    /// Persist the mesh.
    fn write_mesh(&mut self, mesh: &TerrainMesh) -> TerrainResult<()>;
}

/// Writes meshes as ASCII PLY files.
#[derive(Debug, Clone)]
pub struct PlyMeshWriter {
    path: PathBuf,
}

impl PlyMeshWriter {
    /// Writer targeting `path`. The file is created on write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path the mesh will be written to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MeshSink for PlyMeshWriter {
    fn write_mesh(&mut self, mesh: &TerrainMesh) -> TerrainResult<()> {
        save_mesh_ply(mesh, &self.path)
    }
}

/// Save a mesh to an ASCII PLY file.
pub fn save_mesh_ply(mesh: &TerrainMesh, path: &Path) -> TerrainResult<()> {
    info!("Saving mesh to {:?} (PLY ASCII format)", path);

    let file = File::create(path).map_err(|e| TerrainError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);

    write_mesh_ply(mesh, &mut writer).map_err(|e| TerrainError::io_write(path, e))?;
    writer.flush().map_err(|e| TerrainError::io_write(path, e))?;

    info!(
        "Saved {} vertices and {} faces to {:?}",
        mesh.vertex_count(),
        mesh.face_count(),
        path
    );
    Ok(())
}

/// Encode a mesh as ASCII PLY into any writer.
///
/// Vertices are written as `float x y z`; faces as a `uchar`-counted list of
/// `int` indices named `vertex_index`.
pub fn write_mesh_ply<W: Write>(mesh: &TerrainMesh, out: &mut W) -> std::io::Result<usize> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for name in field_names::POSITION {
        vertex_def.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    }
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_index".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    ply.header.elements.add(face_def);

    let vertices: Vec<DefaultElement> = mesh
        .vertices
        .iter()
        .map(|v| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Float(v.x as f32));
            element.insert("y".to_string(), Property::Float(v.y as f32));
            element.insert("z".to_string(), Property::Float(v.z as f32));
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    let mut faces = Vec::with_capacity(mesh.faces.len());
    for face in &mesh.faces {
        let mut indices = Vec::with_capacity(3);
        for &i in face {
            let i = i32::try_from(i).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("vertex index {} does not fit a PLY int", i),
                )
            })?;
            indices.push(i);
        }
        let mut element = DefaultElement::new();
        element.insert("vertex_index".to_string(), Property::ListInt(indices));
        faces.push(element);
    }
    ply.payload.insert("face".to_string(), faces);

    ply.make_consistent().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("PLY consistency error: {:?}", e),
        )
    })?;

    Writer::new().write_ply(out, &mut ply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use nalgebra::Point3;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    const FULL_CLOUD: &str = "ply
format ascii 1.0
element vertex 3
property double x
property double y
property double z
property float nx
property float ny
property float nz
property uchar classification
property float heightaboveground
end_header
0 0 1 0 0 1 2 0.5
1 0 2 0 0 1 6 4.0
0 1 3 0 0 1 2 0
";

    #[test]
    fn test_decode_with_short_normal_names() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "cloud.ply", FULL_CLOUD);

        let cloud = PlyPointCloud::new(&path).decode().unwrap();
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud.schema.position, Some(FieldWidth::F64));
        assert_eq!(cloud.schema.normal, Some(FieldWidth::F32));

        let second = cloud.records[1];
        assert_eq!(second.position, [1.0, 0.0, 2.0]);
        assert_eq!(second.normal, [0.0, 0.0, 1.0]);
        assert_eq!(second.classification, Some(6));
        assert_eq!(second.height_above_ground, Some(4.0));
    }

    #[test]
    fn test_decode_wrong_width_classification_is_ignored() {
        let dir = tempdir().unwrap();
        let contents = "ply
format ascii 1.0
element vertex 1
property float x
property float y
property float z
property float normal_x
property float normal_y
property float normal_z
property ushort classification
end_header
1 2 3 0 0 1 6
";
        let path = write_file(dir.path(), "cloud.ply", contents);
        let cloud = PlyPointCloud::new(&path).decode().unwrap();

        assert_eq!(
            cloud.schema.classification,
            Some(FieldWidth::Other("uint16".to_string()))
        );
        assert_eq!(cloud.records[0].classification, None);
        assert_eq!(cloud.records[0].height_above_ground, None);
    }

    #[test]
    fn test_decode_missing_x_fails_with_input_error() {
        let dir = tempdir().unwrap();
        let contents = "ply
format ascii 1.0
element vertex 1
property float y
property float z
property float nx
property float ny
property float nz
end_header
2 3 0 0 1
";
        let path = write_file(dir.path(), "cloud.ply", contents);
        let err = PlyPointCloud::new(&path).decode().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(matches!(
            err,
            TerrainError::MissingField {
                field: "position",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_x_rejected_before_body_is_parsed() {
        let dir = tempdir().unwrap();
        let contents = "ply
format ascii 1.0
element vertex 2
property float y
property float z
property float nx
property float ny
property float nz
end_header
not a number
";
        let path = write_file(dir.path(), "cloud.ply", contents);
        let err = PlyPointCloud::new(&path).decode().unwrap_err();
        assert!(matches!(
            err,
            TerrainError::MissingField {
                field: "position",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_mixed_normal_aliases() {
        let dir = tempdir().unwrap();
        let contents = "ply
format ascii 1.0
element vertex 2
property float x
property float y
property float z
property float normal_x
property float ny
property float nz
end_header
0 0 0 0.6 0 0.8
1 0 0 0 0.6 0.8
";
        let path = write_file(dir.path(), "cloud.ply", contents);
        let cloud = PlyPointCloud::new(&path).decode().unwrap();

        assert_eq!(cloud.schema.normal, Some(FieldWidth::F32));
        assert_eq!(cloud.records[0].normal, [0.6f32 as f64, 0.0, 0.8f32 as f64]);
        assert_eq!(cloud.records[1].normal, [0.0, 0.6f32 as f64, 0.8f32 as f64]);
    }

    #[test]
    fn test_decode_integer_positions_rejected() {
        let dir = tempdir().unwrap();
        let contents = "ply
format ascii 1.0
element vertex 1
property int x
property int y
property int z
property float nx
property float ny
property float nz
end_header
1 2 3 0 0 1
";
        let path = write_file(dir.path(), "cloud.ply", contents);
        let err = PlyPointCloud::new(&path).decode().unwrap_err();
        assert!(matches!(
            err,
            TerrainError::UnsupportedFieldWidth {
                field: "position",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_missing_file() {
        let err = PlyPointCloud::new("/nonexistent/cloud.ply")
            .decode()
            .unwrap_err();
        assert!(matches!(err, TerrainError::IoRead { .. }));
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    fn triangle_mesh() -> TerrainMesh {
        TerrainMesh {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.5),
                Point3::new(0.0, 1.0, 0.25),
            ],
            faces: vec![[0, 1, 2]],
        }
    }

    #[test]
    fn test_writer_header_layout() {
        let mut buf = Vec::new();
        write_mesh_ply(&triangle_mesh(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            &lines[..9],
            &[
                "ply",
                "format ascii 1.0",
                "element vertex 3",
                "property float x",
                "property float y",
                "property float z",
                "element face 1",
                "property list uchar int vertex_index",
                "end_header",
            ]
        );
        assert_eq!(lines.len(), 9 + 3 + 1);
        assert_eq!(lines[12].trim(), "3 0 1 2");
    }

    #[test]
    fn test_sink_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mesh.ply");
        let mut sink = PlyMeshWriter::new(&path);
        sink.write_mesh(&triangle_mesh()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("ply\n"));
        assert!(text.contains("element face 1"));
    }

    #[test]
    fn test_save_to_missing_directory_fails() {
        let err = triangle_mesh()
            .save("/nonexistent/dir/mesh.ply")
            .unwrap_err();
        assert!(matches!(err, TerrainError::IoWrite { .. }));
        assert_eq!(err.kind(), ErrorKind::Output);
    }
}
