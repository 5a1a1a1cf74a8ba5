//! Externally supplied marshallers: user tier, plugins and subtype dispatch.

use std::any::Any;
use std::sync::Arc;

use h5marshal::marshal::base_attributes;
use h5marshal::{
    CustomValue, File, MarshalError, Marshaller, MarshallerCollection, MarshallerDescriptor,
    MarshallerPlugin, NodeId, Options, Result, Session, Tier, Value,
};

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

impl CustomValue for Point {
    fn type_path(&self) -> &str {
        "geom.Point"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn CustomValue> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn CustomValue) -> bool {
        other.as_any().downcast_ref::<Point>() == Some(self)
    }
}

/// A point carrying a label, derived from `geom.Point`.
#[derive(Debug, Clone, PartialEq)]
struct Labelled {
    point: Point,
    label: String,
}

impl CustomValue for Labelled {
    fn type_path(&self) -> &str {
        "geom.Labelled"
    }

    fn ancestors(&self) -> Vec<String> {
        vec!["geom.Point".into()]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn CustomValue> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn CustomValue) -> bool {
        other.as_any().downcast_ref::<Labelled>() == Some(self)
    }
}

fn coordinates(value: &Value) -> Option<&Point> {
    let Value::Custom(custom) = value else {
        return None;
    };
    let any = custom.as_any();
    any.downcast_ref::<Point>()
        .or_else(|| any.downcast_ref::<Labelled>().map(|l| &l.point))
}

/// Stores a point as a group with `x` and `y` children.
struct PointMarshaller {
    descriptor: MarshallerDescriptor,
}

impl PointMarshaller {
    fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new().with_type("geom.Point", "geom.Point"),
        }
    }
}

impl Marshaller for PointMarshaller {
    fn descriptor(&self) -> &MarshallerDescriptor {
        &self.descriptor
    }

    fn write(
        &self,
        session: &mut Session<'_>,
        parent: NodeId,
        name: &str,
        value: &Value,
    ) -> Result<Option<NodeId>> {
        let point = coordinates(value)
            .ok_or_else(|| MarshalError::unsupported(value.type_path()))?;
        let group = session.storage_mut().require_group(parent, name)?;
        session.write_data(group, "x", &Value::Float(point.x))?;
        session.write_data(group, "y", &Value::Float(point.y))?;
        Ok(Some(group))
    }

    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()> {
        let set = base_attributes(session, &self.descriptor, value)?;
        session.apply_attributes(node, set)
    }

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        let coordinate = |v: Value| match v {
            Value::Float(f) => Ok(f),
            other => Err(MarshalError::unsupported(other.type_path())),
        };
        let x = coordinate(session.read_data(node, "x")?)?;
        let y = coordinate(session.read_data(node, "y")?)?;
        Ok(Value::Custom(Box::new(Point { x, y })))
    }
}

struct GeomPlugin;

impl MarshallerPlugin for GeomPlugin {
    fn name(&self) -> &str {
        "geom"
    }

    fn api_version(&self) -> &str {
        "1.0"
    }

    fn marshallers(&self) -> Vec<Arc<dyn Marshaller>> {
        vec![Arc::new(PointMarshaller::new())]
    }
}

fn point(x: f64, y: f64) -> Value {
    Value::Custom(Box::new(Point { x, y }))
}

#[test]
fn test_user_tier_marshaller_roundtrip() {
    let mut collection = MarshallerCollection::new();
    collection.register(Arc::new(PointMarshaller::new()), Tier::User);
    let options = Options::new().with_marshallers(Arc::new(collection));

    let mut file = File::create(options);
    let value = Value::dict([("origin", point(0.0, 0.0)), ("p", point(1.5, -2.0))]);
    file.write("/shapes", &value).unwrap();
    assert!(file.contains("/shapes/p/x").unwrap());
    assert_eq!(file.read("/shapes").unwrap(), value);
}

#[test]
fn test_plugin_tier_marshaller_roundtrip() {
    let mut collection = MarshallerCollection::new();
    collection.load_plugin(&GeomPlugin).unwrap();
    let options = Options::plain().with_marshallers(Arc::new(collection));

    let mut file = File::create(options);
    file.write("p", &point(3.0, 4.0)).unwrap();
    assert_eq!(file.read("p").unwrap(), point(3.0, 4.0));
}

#[test]
fn test_subtype_uses_ancestor_marshaller() {
    let mut collection = MarshallerCollection::new();
    collection.register(Arc::new(PointMarshaller::new()), Tier::User);
    let options = Options::new().with_marshallers(Arc::new(collection));

    let labelled = Value::Custom(Box::new(Labelled {
        point: Point { x: 1.0, y: 2.0 },
        label: "home".into(),
    }));
    let mut file = File::create(options);
    file.write("l", &labelled).unwrap();
    // read back as the nearest registered type
    assert_eq!(file.read("l").unwrap(), point(1.0, 2.0));
}

#[test]
fn test_unknown_tag_on_read_is_unsupported() {
    let mut collection = MarshallerCollection::new();
    collection.register(Arc::new(PointMarshaller::new()), Tier::User);
    let mut writer = File::create(Options::new().with_marshallers(Arc::new(collection)));
    writer.write("p", &point(1.0, 1.0)).unwrap();

    let mut reader = File::open_bytes(&writer.to_bytes(), Options::new()).unwrap();
    assert!(matches!(
        reader.read("p"),
        Err(MarshalError::UnsupportedType { .. })
    ));
}
