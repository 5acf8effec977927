//! 三角网格的 OBJ 与二进制 STL 读写.
//!
//! OBJ 为文本格式, 仅处理 `v`/`vn`/`f` 三种行; STL 为小端二进制
//! 格式, 80 字节头 + 三角形数 + 逐三角形记录. STL 不含共享顶点,
//! 读取时按量化坐标去重还原索引网格.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::marching::quantize;
use super::TriMesh;
use crate::error::SegError;

#[inline]
fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// 将网格写为 Wavefront OBJ 文本.
///
/// 顶点与面均为 1 起始下标; 含法线时面引用写作 `f a//a b//b c//c`.
pub fn write_obj<P: AsRef<Path>>(mesh: &TriMesh, path: P) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    for [x, y, z] in mesh.vertices() {
        writeln!(w, "v {x} {y} {z}")?;
    }
    if let Some(normals) = mesh.normals() {
        for [x, y, z] in normals {
            writeln!(w, "vn {x} {y} {z}")?;
        }
        for [a, b, c] in mesh.faces() {
            let (a, b, c) = (a + 1, b + 1, c + 1);
            writeln!(w, "f {a}//{a} {b}//{b} {c}//{c}")?;
        }
    } else {
        for [a, b, c] in mesh.faces() {
            writeln!(w, "f {} {} {}", a + 1, b + 1, c + 1)?;
        }
    }
    w.flush()
}

/// 读取 OBJ 文本网格. 未识别的行被忽略.
pub fn read_obj<P: AsRef<Path>>(path: P) -> io::Result<TriMesh> {
    let reader = BufReader::new(File::open(path)?);
    let mut vertices: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut faces: Vec<[u32; 3]> = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("v") => vertices.push(parse_triple(&mut fields)?),
            Some("vn") => normals.push(parse_triple(&mut fields)?),
            Some("f") => {
                let mut face = [0u32; 3];
                for slot in face.iter_mut() {
                    let field = fields.next().ok_or_else(|| invalid_data("面引用不足三个"))?;
                    // 只取顶点下标, 忽略 `/` 后的法线或纹理引用.
                    let index = field.split('/').next().unwrap_or(field);
                    let index: u32 = index
                        .parse()
                        .map_err(|_| invalid_data(format!("非法面下标: {field}")))?;
                    if index == 0 {
                        return Err(invalid_data("OBJ 面下标从 1 起始"));
                    }
                    *slot = index - 1;
                }
                faces.push(face);
            }
            _ => {}
        }
    }

    let normals = (!normals.is_empty()).then_some(normals);
    TriMesh::from_parts(vertices, faces, normals).map_err(|e| match e {
        SegError::Geometry(msg) => invalid_data(msg),
        other => invalid_data(other.to_string()),
    })
}

fn parse_triple<'a, I: Iterator<Item = &'a str>>(fields: &mut I) -> io::Result<[f32; 3]> {
    let mut out = [0.0f32; 3];
    for slot in out.iter_mut() {
        let field = fields.next().ok_or_else(|| invalid_data("坐标分量不足三个"))?;
        *slot = field
            .parse()
            .map_err(|_| invalid_data(format!("非法坐标分量: {field}")))?;
    }
    Ok(out)
}

/// 将网格写为二进制 STL.
pub fn write_stl<P: AsRef<Path>>(mesh: &TriMesh, path: P) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    let mut header = [0u8; 80];
    let tag = b"mr-berry binary stl";
    header[..tag.len()].copy_from_slice(tag);
    w.write_all(&header)?;

    let count = u32::try_from(mesh.face_count())
        .map_err(|_| invalid_data("三角形数超出 STL 表示范围"))?;
    w.write_all(&count.to_le_bytes())?;

    let vertices = mesh.vertices();
    for [a, b, c] in mesh.faces() {
        let v0 = vertices[*a as usize];
        let v1 = vertices[*b as usize];
        let v2 = vertices[*c as usize];
        write_point(&mut w, facet_normal(v0, v1, v2))?;
        write_point(&mut w, v0)?;
        write_point(&mut w, v1)?;
        write_point(&mut w, v2)?;
        w.write_all(&0u16.to_le_bytes())?;
    }
    w.flush()
}

/// 读取二进制 STL 网格, 按量化坐标合并重复顶点.
pub fn read_stl<P: AsRef<Path>>(path: P) -> io::Result<TriMesh> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header = [0u8; 80];
    reader.read_exact(&mut header)?;
    let mut count_buf = [0u8; 4];
    reader.read_exact(&mut count_buf)?;
    let count = u32::from_le_bytes(count_buf) as usize;

    let mut vertices: Vec<[f32; 3]> = Vec::new();
    // 头部的三角形数不可信, 预分配设上限; 超出部分随读取自然增长.
    let mut faces: Vec<[u32; 3]> = Vec::with_capacity(count.min(1 << 16));
    let mut dedup: std::collections::HashMap<[i64; 3], u32> = std::collections::HashMap::new();

    for _ in 0..count {
        // 面法线由顶点重算, 读取时丢弃.
        read_point(&mut reader)?;
        let mut face = [0u32; 3];
        for slot in face.iter_mut() {
            let p = read_point(&mut reader)?;
            let key = quantize(p);
            *slot = *dedup.entry(key).or_insert_with(|| {
                vertices.push(p);
                (vertices.len() - 1) as u32
            });
        }
        let mut attr = [0u8; 2];
        reader.read_exact(&mut attr)?;
        faces.push(face);
    }

    TriMesh::from_parts(vertices, faces, None).map_err(|e| invalid_data(e.to_string()))
}

fn facet_normal(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3]) -> [f32; 3] {
    let u = [v1[0] - v0[0], v1[1] - v0[1], v1[2] - v0[2]];
    let v = [v2[0] - v0[0], v2[1] - v0[1], v2[2] - v0[2]];
    let n = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len > 1e-12 {
        n.map(|c| c / len)
    } else {
        [0.0, 0.0, 0.0]
    }
}

fn write_point<W: Write>(w: &mut W, p: [f32; 3]) -> io::Result<()> {
    for c in p {
        w.write_all(&c.to_le_bytes())?;
    }
    Ok(())
}

fn read_point<R: Read>(r: &mut R) -> io::Result<[f32; 3]> {
    let mut buf = [0u8; 4];
    let mut out = [0.0f32; 3];
    for slot in out.iter_mut() {
        r.read_exact(&mut buf)?;
        *slot = f32::from_le_bytes(buf);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::marching::extract_surface;
    use super::*;
    use crate::data::Spacing;
    use ndarray::Array3;

    fn sample_mesh() -> TriMesh {
        let mut mask = Array3::<u8>::zeros((5, 5, 5));
        for z in 1..=3 {
            for h in 1..=3 {
                for w in 1..=3 {
                    mask[[z, h, w]] = 1;
                }
            }
        }
        extract_surface(mask.view(), Spacing::isotropic()).unwrap()
    }

    #[test]
    fn test_obj_round_trip() {
        let mesh = sample_mesh();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tumor.obj");

        write_obj(&mesh, &path).unwrap();
        let loaded = read_obj(&path).unwrap();

        assert_eq!(loaded.vertex_count(), mesh.vertex_count());
        assert_eq!(loaded.face_count(), mesh.face_count());
        assert_eq!(loaded.faces(), mesh.faces());
        assert!(loaded.normals().is_some());
    }

    #[test]
    fn test_stl_round_trip_preserves_topology() {
        let mesh = sample_mesh();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tumor.stl");

        write_stl(&mesh, &path).unwrap();
        let loaded = read_stl(&path).unwrap();

        // STL 展开共享顶点, 读取端靠量化去重还原.
        assert_eq!(loaded.vertex_count(), mesh.vertex_count());
        assert_eq!(loaded.face_count(), mesh.face_count());
    }

    #[test]
    fn test_stl_file_size() {
        let mesh = sample_mesh();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tumor.stl");
        write_stl(&mesh, &path).unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 84 + 50 * mesh.face_count() as u64);
    }

    #[test]
    fn test_read_stl_rejects_oversized_triangle_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.stl");
        // 84 字节的头声称 u32::MAX 个三角形, 却不携带任何记录.
        let mut bytes = vec![0u8; 80];
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = read_stl(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_obj_rejects_dangling_face() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.obj");
        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 9\n").unwrap();

        let err = read_obj(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_obj_rejects_zero_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.obj");
        std::fs::write(&path, "v 0 0 0\nf 0 0 0\n").unwrap();
        assert!(read_obj(&path).is_err());
    }
}
